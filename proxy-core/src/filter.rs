/// Keywords masked out of client -> agent tunnel traffic
pub const DEFAULT_KEYWORDS: [&str; 4] = ["chunked", "json", "urlencoded", "give me flag!"];

const REPLACEMENT: &[u8] = b"REDACTED";

/// In-place keyword masking for tunnel chunks
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    keywords: Vec<Vec<u8>>,
}

impl Default for KeywordFilter {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect())
    }
}

impl KeywordFilter {
    /// Create a new KeywordFilter; matching is ASCII case-insensitive
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .filter(|k| !k.is_empty())
                .map(|k| k.to_ascii_lowercase().into_bytes())
                .collect(),
        }
    }

    /// Overwrite every occurrence of every keyword in `data`.
    ///
    /// Each match is replaced by `REDACTED`, cut or space-padded to the
    /// keyword's length, so the chunk length never changes. Matching is per
    /// chunk: a keyword split across two reads is not seen. Returns the number
    /// of replacements made.
    pub fn redact(&self, data: &mut [u8]) -> usize {
        let mut hits = 0;

        for keyword in &self.keywords {
            let mask = mask_for(keyword.len());
            let mut search = 0;
            while let Some(idx) = find_ignore_case(&data[search..], keyword) {
                let start = search + idx;
                let end = start + keyword.len();
                data[start..end].copy_from_slice(&mask);
                search = end;
                hits += 1;
            }
        }

        hits
    }
}

fn mask_for(len: usize) -> Vec<u8> {
    let mut mask: Vec<u8> = REPLACEMENT.iter().copied().take(len).collect();
    mask.resize(len, b' ');
    mask
}

fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn redact(input: &str) -> (String, usize) {
        let mut data = input.as_bytes().to_vec();
        let hits = KeywordFilter::default().redact(&mut data);
        (String::from_utf8(data).unwrap(), hits)
    }

    #[test]
    fn test_redaction_masks() {
        assert_eq!(redact("GIVE ME FLAG!").0, "REDACTED     ");
        assert_eq!(redact("Content-Type: application/json").0, "Content-Type: application/REDA");
        assert_eq!(
            redact("Transfer-Encoding: Chunked").0,
            "Transfer-Encoding: REDACTE"
        );
        assert_eq!(
            redact("application/x-www-form-urlencoded").0,
            "application/x-www-form-REDACTED  "
        );
    }

    #[test]
    fn test_every_occurrence_is_counted() {
        let (out, hits) = redact("json JSON jSoN give me flag!");
        assert_eq!(out, "REDA REDA REDA REDACTED     ");
        assert_eq!(hits, 4);
    }

    #[test]
    fn test_split_keyword_passes() {
        let filter = KeywordFilter::default();
        let mut first = b"GIVE ME F".to_vec();
        let mut second = b"LAG!".to_vec();
        assert_eq!(filter.redact(&mut first), 0);
        assert_eq!(filter.redact(&mut second), 0);
    }

    #[test]
    fn test_custom_keywords_and_empty_entries() {
        let filter = KeywordFilter::new(vec![String::new(), "flag".to_string()]);
        let mut data = b"flagFLAG".to_vec();
        assert_eq!(filter.redact(&mut data), 2);
        assert_eq!(&data, b"REDAREDA");
    }

    proptest! {
        #[test]
        fn test_redaction_preserves_length_and_removes_keywords(
            data in prop::collection::vec(any::<u8>(), 0..512)
        ) {
            let filter = KeywordFilter::default();
            let mut redacted = data.clone();
            filter.redact(&mut redacted);
            prop_assert_eq!(redacted.len(), data.len());
            for keyword in DEFAULT_KEYWORDS {
                prop_assert!(find_ignore_case(&redacted, keyword.as_bytes()).is_none());
            }
        }
    }
}
