/* src/server/core/rust/src/escape.rs */

use std::fmt::Write;

/// Make serialized JSON safe to inline inside a `<script>` element.
///
/// Walks the JSON text tracking whether the current position is inside a
/// JSON string (handling `\"` and `\\`). Inside strings, non-ASCII codepoints
/// become `\uXXXX` (surrogate pairs outside the BMP) and `<`, `>`, `&` are
/// escaped so the text can never close the surrounding tag.
pub fn escape_json_for_script(json: &str) -> String {
  let mut out = String::with_capacity(json.len());
  let mut in_string = false;
  let mut chars = json.chars();

  while let Some(ch) = chars.next() {
    if !in_string {
      if ch == '"' {
        in_string = true;
      }
      out.push(ch);
      continue;
    }

    match ch {
      '\\' => {
        out.push(ch);
        if let Some(next) = chars.next() {
          out.push(next);
        }
      }
      '"' => {
        in_string = false;
        out.push(ch);
      }
      '<' | '>' | '&' => push_unit(&mut out, ch as u32),
      _ if ch as u32 > 0x7F => {
        let code = ch as u32;
        if code > 0xFFFF {
          let adjusted = code - 0x1_0000;
          push_unit(&mut out, (adjusted >> 10) + 0xD800);
          push_unit(&mut out, (adjusted & 0x3FF) + 0xDC00);
        } else {
          push_unit(&mut out, code);
        }
      }
      _ => out.push(ch),
    }
  }
  out
}

fn push_unit(out: &mut String, unit: u32) {
  let _ = write!(out, "\\u{unit:04x}");
}
