//! Numeric token extraction
//!
//! A token is a maximal run of 1 to 16 ASCII digits with a non-zero first
//! digit, optionally followed by `.` and a fractional run. Runs that fail
//! the rules produce nothing, but a fractional run after a rejected integer
//! run is scanned as a run of its own (`0.25` yields `25`).

/// Longest accepted integer part
pub const MAX_INTEGER_DIGITS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberToken<'a> {
    pub text: &'a str,
    pub first_digit: u8,
    /// Present when the integer part has at least two digits
    pub second_digit: Option<u8>,
}

/// Cheap first pass over the raw body: any byte in `1..=9`
///
/// Every record that yields a token in the second pass contains such a byte,
/// so records failing this check can be skipped without stripping markup.
pub fn quick_has_numbers(body: &[u8]) -> bool {
    body.iter().any(|b| (b'1'..=b'9').contains(b))
}

/// Iterate over the numeric tokens of plain text
pub fn extract_numbers(text: &str) -> NumberTokens<'_> {
    NumberTokens { text, pos: 0 }
}

pub struct NumberTokens<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Iterator for NumberTokens<'a> {
    type Item = NumberToken<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.text.as_bytes();
        let n = bytes.len();

        while self.pos < n {
            if !bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
                continue;
            }

            let start = self.pos;
            while self.pos < n && bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
            let run_len = self.pos - start;
            if bytes[start] == b'0' || run_len > MAX_INTEGER_DIGITS {
                continue;
            }

            let mut end = self.pos;
            if end + 1 < n && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
                end += 1;
                while end < n && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                self.pos = end;
            }

            // ASCII digits and '.' are single bytes, so the slice is on char boundaries
            let text = &self.text[start..end];
            return Some(NumberToken {
                text,
                first_digit: bytes[start] - b'0',
                second_digit: (run_len >= 2).then(|| bytes[start + 1] - b'0'),
            });
        }

        None
    }
}
