//! Decoding of the position prefix of cost lines
//!
//! A position column is one of `*` (inherit from the cursor), `+d`/`-d`
//! (delta against the cursor), or a literal, optionally followed by a range
//! suffix (`+d`, `-v`, `:v`). Address columns come before line columns and
//! parse as hex; line columns parse as decimal.
//!
//! Parsing is rejection-only: the cursor is never touched, and a `None`
//! result leaves the caller free to reclassify the line.

use crate::core::types::{Addr, Position};
use crate::parser::scan::Scanner;

/// Which position columns cost lines carry, from the `positions:` header.
/// Dumps without that header carry a line column only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionColumns {
    pub has_instr: bool,
    pub has_line: bool,
}

impl Default for PositionColumns {
    fn default() -> Self {
        Self {
            has_instr: false,
            has_line: true,
        }
    }
}

/// Successful parse; `line_underflow` flags a `-d` line delta clamped to zero
#[derive(Debug, Clone, Copy)]
pub struct ParsedPosition {
    pub pos: Position,
    pub line_underflow: bool,
}

pub fn parse_position(
    s: &mut Scanner<'_>,
    cursor: &Position,
    columns: PositionColumns,
) -> Option<ParsedPosition> {
    let mut pos = *cursor;
    let mut line_underflow = false;

    if columns.has_instr {
        match s.first()? {
            b'*' => {
                s.strip_first();
            }
            b'+' => {
                s.strip_first();
                let delta = s.strip_hex_raw()?;
                pos.from_addr = cursor.from_addr.offset(delta);
                pos.to_addr = pos.from_addr;
            }
            b'-' => {
                s.strip_first();
                let delta = s.strip_hex_raw()?;
                pos.from_addr = cursor.from_addr.back(delta);
                pos.to_addr = pos.from_addr;
            }
            c if c.is_ascii_hexdigit() => {
                pos.from_addr = Addr(s.strip_hex_raw()?);
                pos.to_addr = pos.from_addr;
            }
            _ => return None,
        }
        match s.first() {
            Some(b'+') => {
                s.strip_first();
                pos.to_addr = pos.from_addr.offset(s.strip_hex()?);
            }
            Some(b'-') | Some(b':') => {
                s.strip_first();
                pos.to_addr = Addr(s.strip_hex()?);
            }
            _ => {}
        }
        s.strip_spaces();
    }

    if columns.has_line {
        let c = s.first()?;
        if c > b'9' {
            return None;
        }
        match c {
            b'*' => {
                s.strip_first();
            }
            b'+' => {
                s.strip_first();
                let delta = s.strip_uint_raw()?;
                pos.from_line = cursor.from_line.wrapping_add(delta);
                pos.to_line = pos.from_line;
            }
            b'-' => {
                s.strip_first();
                let delta = s.strip_uint_raw()?;
                if cursor.from_line < delta {
                    line_underflow = true;
                    pos.from_line = 0;
                } else {
                    pos.from_line = cursor.from_line - delta;
                }
                pos.to_line = pos.from_line;
            }
            b'0'..=b'9' => {
                pos.from_line = s.strip_uint_raw()?;
                pos.to_line = pos.from_line;
            }
            _ => return None,
        }
        match s.first() {
            Some(b'+') => {
                s.strip_first();
                pos.to_line = pos.from_line.wrapping_add(s.strip_uint()?);
            }
            Some(b'-') | Some(b':') => {
                s.strip_first();
                pos.to_line = s.strip_uint()?;
            }
            _ => {}
        }
        s.strip_spaces();
    }

    Some(ParsedPosition {
        pos,
        line_underflow,
    })
}
