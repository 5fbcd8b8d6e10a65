//! Decoding of name-value-storage (NVS) record values.
//!
//! Chain name records store their payload as a multi-line `key=value` blob.
//! Values are free-form and may end in a raw binary tail: once a line
//! contains non-printable control bytes, everything from that line's value
//! onward belongs to the current key verbatim.

use std::collections::BTreeMap;

/// Control bytes that mark a line as raw binary rather than text.
///
/// Tab (0x09), LF (0x0A) and CR (0x0D) are ordinary whitespace inside text
/// values and deliberately excluded from the range.
fn is_binary(line: &str) -> bool {
    line.bytes().any(|b| matches!(b, 0x00..=0x08 | 0x0E..=0x1F))
}

/// Splits a record line at the first `=`; later `=` stay in the value.
/// A line without `=` maps the whole line to an empty value.
fn split_kv(line: &str) -> (&str, &str) {
    match line.split_once('=') {
        Some((key, value)) => (key, value),
        None => (line, ""),
    }
}

/// Decodes a multi-line `key=value` blob into a map.
///
/// Lines are decoded one by one; an empty line ends decoding. A line
/// containing raw control bytes absorbs all remaining lines (joined without
/// separators) into the current value as an embedded binary tail, and
/// decoding stops there.
///
/// # Example
///
/// ```
/// use chainquorum::nvs::parse_nvs_value;
///
/// let record = parse_nvs_value("dns=example.org\nns=10.0.0.1\n");
/// assert_eq!(record["dns"], "example.org");
/// assert_eq!(record["ns"], "10.0.0.1");
/// ```
pub fn parse_nvs_value(value: &str) -> BTreeMap<String, String> {
    let mut record = BTreeMap::new();
    let mut lines = value.split('\n');

    while let Some(line) = lines.next() {
        if line.is_empty() {
            break;
        }
        let (key, rest) = split_kv(line);
        if is_binary(line) {
            let mut tail = rest.to_owned();
            for remaining in lines {
                tail.push_str(remaining);
            }
            record.insert(key.to_owned(), tail);
            return record;
        }
        record.insert(key.to_owned(), rest.to_owned());
    }

    record
}
