//! Discovery of hierarchical sheets referenced by a KiCad schematic.
//!
//! A sheet appears in the s-expression source as
//! `(sheet ... (property "Sheetfile" "power.kicad_sch") ...)`. Older files
//! spell the properties `"Sheet name"` and `"Sheet file"`.

/// A sub-sheet referenced from a schematic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRef {
    /// Display name of the sheet.
    pub name: String,
    /// File path relative to the referencing schematic's directory.
    pub file: String,
}

/// Reasons a schematic could not be scanned for sheets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchematicError {
    /// The source does not start with `(kicad_sch`.
    #[error("not a kicad_sch document")]
    NotASchematic,
    /// A `(sheet` block has no closing parenthesis.
    #[error("sheet at byte {offset} is not closed")]
    UnclosedSheet {
        /// Byte offset of the `(sheet` token.
        offset: usize,
    },
}

/// List the sheets directly referenced by a schematic, in source order.
/// Sheet blocks missing their name or file property are logged and skipped.
///
/// # Errors
///
/// Returns a [`SchematicError`] for sources that are not schematics or that
/// contain an unclosed sheet block.
pub fn sheet_refs(source: &str) -> Result<Vec<SheetRef>, SchematicError> {
    if !source.trim_start().starts_with("(kicad_sch") {
        return Err(SchematicError::NotASchematic);
    }

    let bytes = source.as_bytes();
    let mut sheets = Vec::new();
    let mut pos = 0;
    while let Some(found) = source[pos..].find("(sheet") {
        let start = pos + found;
        let body = start + "(sheet".len();
        // `(sheet_instances` and friends share the prefix.
        if !bytes.get(body).is_some_and(u8::is_ascii_whitespace) {
            pos = body;
            continue;
        }

        let end = closing_paren(bytes, body).ok_or(SchematicError::UnclosedSheet { offset: start })?;
        let block = &source[body..end];

        let mut name = None;
        let mut file = None;
        for (key, value) in properties(block) {
            match key.as_str() {
                "Sheetname" | "Sheet name" => name = Some(value),
                "Sheetfile" | "Sheet file" => file = Some(value),
                _ => {}
            }
        }
        match (name, file) {
            (Some(name), Some(file)) => sheets.push(SheetRef { name, file }),
            (name, file) => tracing::warn!(
                offset = start,
                name = name.as_deref().unwrap_or_default(),
                file = file.as_deref().unwrap_or_default(),
                "skipping sheet without name or file property"
            ),
        }
        pos = end + 1;
    }
    Ok(sheets)
}

/// Index of the parenthesis closing the list whose body starts at `from`.
fn closing_paren(bytes: &[u8], from: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut in_string = false;
    let mut escaped = false;
    for (index, byte) in bytes.iter().enumerate().skip(from) {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

/// `(property "key" "value" ...)` pairs appearing anywhere in `block`.
fn properties(block: &str) -> Vec<(String, String)> {
    let mut found = Vec::new();
    let mut rest = block;
    while let Some(index) = rest.find("(property") {
        rest = &rest[index + "(property".len()..];
        let Some((key, after_key)) = quoted(rest) else {
            continue;
        };
        let Some((value, after_value)) = quoted(after_key) else {
            continue;
        };
        found.push((key, value));
        rest = after_value;
    }
    found
}

/// Parse a leading (whitespace-prefixed) quoted string.
fn quoted(input: &str) -> Option<(String, &str)> {
    let trimmed = input.trim_start();
    let body = trimmed.strip_prefix('"')?;
    let mut value = String::new();
    let mut chars = body.char_indices();
    while let Some((index, ch)) = chars.next() {
        match ch {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    value.push(escaped);
                }
            }
            '"' => return Some((value, &body[index + 1..])),
            other => value.push(other),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = r#"(kicad_sch (version 20231120) (generator "eeschema")
  (uuid "0b6c")
  (sheet (at 50 40) (size 20 10)
    (uuid "a1")
    (property "Sheetname" "Power" (at 50 39 0))
    (property "Sheetfile" "power.kicad_sch" (at 50 51 0))
  )
  (sheet (at 80 40) (size 20 10)
    (property "Sheetname" "IO (left)" (at 80 39 0))
    (property "Sheetfile" "sub/io.kicad_sch" (at 80 51 0))
  )
  (sheet_instances (path "/" (page "1")))
)
"#;

    #[test]
    fn finds_sheets_in_source_order() {
        let sheets = sheet_refs(ROOT).expect("parse sheets");
        assert_eq!(
            sheets,
            vec![
                SheetRef {
                    name: "Power".into(),
                    file: "power.kicad_sch".into()
                },
                SheetRef {
                    name: "IO (left)".into(),
                    file: "sub/io.kicad_sch".into()
                },
            ]
        );
    }

    #[test]
    fn accepts_legacy_property_names() {
        let source = r#"(kicad_sch
  (sheet (at 0 0)
    (property "Sheet name" "Legacy")
    (property "Sheet file" "legacy.kicad_sch")))"#;
        let sheets = sheet_refs(source).expect("parse sheets");
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].file, "legacy.kicad_sch");
    }

    #[test]
    fn leaf_schematic_has_no_sheets() {
        let source = "(kicad_sch (version 1) (sheet_instances (path \"/\")))";
        assert_eq!(sheet_refs(source), Ok(Vec::new()));
    }

    #[test]
    fn rejects_non_schematics_and_unclosed_sheets() {
        assert_eq!(sheet_refs("(kicad_pcb)"), Err(SchematicError::NotASchematic));
        assert!(matches!(
            sheet_refs("(kicad_sch (sheet (property \"Sheetname\" \"x\")"),
            Err(SchematicError::UnclosedSheet { .. })
        ));
    }

    #[test]
    fn incomplete_sheet_does_not_hide_its_siblings() {
        let source = r#"(kicad_sch
  (sheet (at 0 0) (property "Sheetname" "Orphan"))
  (sheet (at 10 0)
    (property "Sheetname" "Power")
    (property "Sheetfile" "power.kicad_sch"))
  (sheet (at 20 0) (property "Sheetfile" "nameless.kicad_sch")))"#;
        assert_eq!(
            sheet_refs(source),
            Ok(vec![SheetRef {
                name: "Power".into(),
                file: "power.kicad_sch".into()
            }])
        );
    }
}
