//! DMAP (tag/length/value) metadata parsing.
//!
//! `SET_PARAMETER` bodies with `application/x-dmap-tagged` carry the
//! now-playing track description as a four-char tag tree.

/// Track fields extracted from a DMAP body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmapTrack {
    /// `minm`
    pub title: Option<String>,
    /// `asar`
    pub artist: Option<String>,
    /// `asal`
    pub album: Option<String>,
    /// `asgn`
    pub genre: Option<String>,
}

const CONTAINERS: [&[u8; 4]; 4] = [b"mlit", b"mlcl", b"mcon", b"adbs"];

fn walk(buf: &[u8], depth: u8, track: &mut DmapTrack) {
    if depth > 4 {
        return;
    }

    let mut pos = 0usize;
    while pos + 8 <= buf.len() {
        let tag: [u8; 4] = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
        let len = u32::from_be_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]])
            as usize;
        pos += 8;
        if pos + len > buf.len() {
            break;
        }
        let value = &buf[pos..pos + len];
        pos += len;

        if CONTAINERS.contains(&&tag) {
            walk(value, depth + 1, track);
            continue;
        }

        let text = || Some(String::from_utf8_lossy(value).into_owned());
        match &tag {
            b"minm" => track.title = text(),
            b"asar" => track.artist = text(),
            b"asal" => track.album = text(),
            b"asgn" => track.genre = text(),
            _ => {}
        }
    }
}

/// Parse a DMAP body. Total over arbitrary bytes.
#[must_use]
pub fn parse(buf: &[u8]) -> DmapTrack {
    let mut track = DmapTrack::default();
    walk(buf, 0, &mut track);
    track
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &[u8; 4], value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(name);
        out.extend_from_slice(&u32::try_from(value.len()).unwrap().to_be_bytes());
        out.extend_from_slice(value);
        out
    }

    #[test]
    fn flat_tags_parse() {
        let mut body = tag(b"minm", b"Song");
        body.extend(tag(b"asar", b"Artist"));
        body.extend(tag(b"asal", b"Album"));

        let track = parse(&body);
        assert_eq!(track.title.as_deref(), Some("Song"));
        assert_eq!(track.artist.as_deref(), Some("Artist"));
        assert_eq!(track.album.as_deref(), Some("Album"));
    }

    #[test]
    fn nested_listing_item_parses() {
        let inner = [tag(b"minm", b"Nested"), tag(b"astn", &[0, 1])].concat();
        let body = tag(b"mlit", &inner);
        let track = parse(&body);
        assert_eq!(track.title.as_deref(), Some("Nested"));
    }

    #[test]
    fn truncated_input_is_harmless() {
        let mut body = tag(b"minm", b"Song");
        body.truncate(10);
        let _ = parse(&body);
        let _ = parse(&[0xFF; 7]);
        let _ = parse(b"mlit\xFF\xFF\xFF\xFF");
    }
}
