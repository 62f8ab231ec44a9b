//! Record framing: JSON records terminated by [`RECORD_SEPARATOR`].

use crate::constants::RECORD_SEPARATOR;

/// Appends the record separator to a serialized record.
pub fn write_record(json: &str) -> String {
    let mut record = String::with_capacity(json.len() + 1);
    record.push_str(json);
    record.push(RECORD_SEPARATOR);
    record
}

/// Splits a transport frame into its complete records.
///
/// Returns the terminated records (without their separators) and any
/// trailing text that was not terminated. Empty records are skipped.
pub fn split_records(frame: &str) -> (Vec<&str>, &str) {
    let mut records = Vec::new();
    let mut rest = frame;
    while let Some(pos) = rest.find(RECORD_SEPARATOR) {
        let record = &rest[..pos];
        if !record.trim().is_empty() {
            records.push(record);
        }
        rest = &rest[pos + RECORD_SEPARATOR.len_utf8()..];
    }
    (records, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_record_appends_separator() {
        assert_eq!(write_record("{}"), "{}\u{1e}");
    }

    #[test]
    fn split_single_record() {
        let (records, rest) = split_records("{\"type\":6}\u{1e}");
        assert_eq!(records, vec!["{\"type\":6}"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn split_concatenated_records() {
        let frame = "{}\u{1e}{\"type\":1}\u{1e}{\"type\":3}\u{1e}";
        let (records, rest) = split_records(frame);
        assert_eq!(records, vec!["{}", "{\"type\":1}", "{\"type\":3}"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn split_keeps_unterminated_tail() {
        let (records, rest) = split_records("{\"a\":1}\u{1e}{\"b\":");
        assert_eq!(records, vec!["{\"a\":1}"]);
        assert_eq!(rest, "{\"b\":");
    }

    #[test]
    fn split_skips_empty_records() {
        let (records, rest) = split_records("\u{1e}\u{1e}{}\u{1e}");
        assert_eq!(records, vec!["{}"]);
        assert!(rest.is_empty());
    }
}
