//! Spreadsheet sink writing minimal Office Open XML workbooks.
//!
//! A workbook is a zip of five XML parts: content types, package
//! relationships, the workbook, its relationships and a single sheet. Cells
//! are inline strings, so no shared-string table or style sheet is needed.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use quick_xml::escape::escape;
use tracing::info;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use super::{COLUMNS, DurableSink, select_columns};
use crate::error::SinkError;
use crate::pipeline::types::{ClassifiedRecord, FlushKind};

/// Suffixes tried before giving up on finding a free filename.
const MAX_NAME_ATTEMPTS: u32 = 1000;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="articles" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

/// Writes each flush to `{partial|final}_{YYYYmmdd_HHMMSS}.xlsx` in a directory.
#[derive(Debug, Clone)]
pub struct XlsxSink {
    output_dir: PathBuf,
}

impl XlsxSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create a fresh artifact file for `stem`, adding `_1`, `_2`, … while
    /// the name is taken.
    fn create_artifact(&self, stem: &str) -> Result<(PathBuf, File), SinkError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{stem}.xlsx")
            } else {
                format!("{stem}_{attempt}.xlsx")
            };
            let path = self.output_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(SinkError::Io { path, source }),
            }
        }
        Err(SinkError::NameExhausted(stem.to_string(), MAX_NAME_ATTEMPTS))
    }
}

#[async_trait]
impl DurableSink for XlsxSink {
    async fn persist(
        &self,
        records: &[ClassifiedRecord],
        kind: FlushKind,
    ) -> Result<PathBuf, SinkError> {
        let stem = format!("{}_{}", kind.label(), Local::now().format("%Y%m%d_%H%M%S"));
        let (path, file) = self.create_artifact(&stem)?;
        write_workbook(file, &sheet_xml(records)).map_err(|source| SinkError::Zip {
            path: path.clone(),
            source,
        })?;

        info!(
            path = %path.display(),
            kind = kind.label(),
            records = records.len(),
            "Saved results"
        );
        Ok(path)
    }
}

fn write_workbook(file: File, sheet: &str) -> Result<(), zip::result::ZipError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = zip::ZipWriter::new(file);

    let parts = [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", ROOT_RELS),
        ("xl/workbook.xml", WORKBOOK),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
        ("xl/worksheets/sheet1.xml", sheet),
    ];
    for (name, body) in parts {
        zip.start_file(name, options)?;
        zip.write_all(body.as_bytes())?;
    }

    zip.finish()?.sync_all()?;
    Ok(())
}

/// Header row plus one row per record.
fn sheet_xml(records: &[ClassifiedRecord]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );

    push_row(&mut xml, 1, COLUMNS.iter().copied().enumerate());
    for (i, record) in records.iter().enumerate() {
        // Absent columns stay blank.
        let cells = select_columns(record).into_iter().filter_map(|(name, value)| {
            COLUMNS
                .iter()
                .position(|column| *column == name)
                .map(|col| (col, value))
        });
        push_row(&mut xml, i + 2, cells);
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}

fn push_row<'a>(xml: &mut String, row: usize, cells: impl Iterator<Item = (usize, &'a str)>) {
    xml.push_str(&format!(r#"<row r="{row}">"#));
    for (col, value) in cells {
        let text = sanitize(value);
        xml.push_str(&format!(
            r#"<c r="{}{row}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
            column_letter(col),
            escape(text.as_str()),
        ));
    }
    xml.push_str("</row>");
}

/// `0 -> A`, `25 -> Z`, `26 -> AA`.
fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Drop characters XML 1.0 cannot carry.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| {
            matches!(c, '\t' | '\n' | '\r')
                || (*c >= ' ' && !matches!(c, '\u{FFFE}' | '\u{FFFF}'))
        })
        .collect()
}
