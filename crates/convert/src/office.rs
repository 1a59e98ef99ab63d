//! Office-document conversion.
//!
//! The backend ingests PDF, text, CSV, and media natively but not
//! OOXML/ODF containers. This module unpacks those containers and
//! re-emits their textual content:
//!
//! - xlsx/ods → delimited text, one `# Sheet: <name>` section per sheet
//! - docx/odt/odp → plain text paragraphs
//! - pptx → plain text with `# Slide <n>` section markers
//!
//! All archives are ZIP; entry reads are size-bounded.

use std::io::Read;

use async_trait::async_trait;

use docshelf_core::artifact::Thumbnail;
use docshelf_core::convert::{Converted, ConverterSet};
use docshelf_core::error::ConvertError;

use crate::detect::{MIME_CSV, MIME_DOCX, MIME_ODP, MIME_ODS, MIME_ODT, MIME_PPTX, MIME_TEXT,
    MIME_XLSX};

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum worksheets processed per workbook.
const MAX_SHEETS: usize = 100;
/// Maximum cells processed per sheet.
const MAX_CELLS_PER_SHEET: usize = 100_000;
/// Cap on ODF `number-columns-repeated` expansion per cell.
const MAX_CELL_REPEAT: usize = 256;

/// Built-in `ConverterSet` for office formats.
#[derive(Debug, Default, Clone)]
pub struct OfficeConverter;

#[async_trait]
impl ConverterSet for OfficeConverter {
    fn needs_conversion(&self, original_format: &str) -> bool {
        matches!(
            original_format,
            MIME_DOCX | MIME_XLSX | MIME_PPTX | MIME_ODS | MIME_ODT | MIME_ODP
        )
    }

    async fn convert(
        &self,
        bytes: &[u8],
        original_format: &str,
    ) -> std::result::Result<Converted, ConvertError> {
        let (text, ingest_format) = match original_format {
            MIME_XLSX => (xlsx_to_csv(bytes)?, MIME_CSV),
            MIME_ODS => (ods_to_csv(bytes)?, MIME_CSV),
            MIME_DOCX => (docx_to_text(bytes)?, MIME_TEXT),
            MIME_PPTX => (pptx_to_text(bytes)?, MIME_TEXT),
            MIME_ODT | MIME_ODP => (odf_to_text(bytes)?, MIME_TEXT),
            other => return Err(ConvertError::Unsupported(other.to_string())),
        };
        Ok(Converted {
            bytes: text.into_bytes(),
            ingest_format: ingest_format.to_string(),
        })
    }

    fn thumbnail(&self, bytes: &[u8], original_format: &str) -> Option<Thumbnail> {
        if original_format.starts_with("image/") {
            return crate::thumb::image_thumbnail(bytes);
        }
        None
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> std::result::Result<Archive<'_>, ConvertError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ConvertError::Container(e.to_string()))
}

fn read_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
) -> std::result::Result<Vec<u8>, ConvertError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ConvertError::Container(format!("{name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ConvertError::Container(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ConvertError::Container(format!(
            "ZIP entry {name} exceeds {MAX_XML_ENTRY_BYTES} byte limit"
        )));
    }
    Ok(out)
}

/// Quote a cell for delimited-text output when needed.
fn csv_escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn render_sheet(out: &mut String, name: &str, rows: &[Vec<String>]) {
    out.push_str(&format!("# Sheet: {name}\n"));
    for row in rows {
        let line: Vec<String> = row.iter().map(|c| csv_escape(c)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out.push('\n');
}

// ---------------------------------------------------------------------------
// xlsx

fn xlsx_to_csv(bytes: &[u8]) -> std::result::Result<String, ConvertError> {
    let mut archive = open_archive(bytes)?;
    let shared = read_shared_strings(&mut archive)?;
    let sheet_names = xlsx_sheet_display_names(&mut archive)?;
    let entries = xlsx_worksheet_entries(&archive);

    let mut out = String::new();
    for (idx, entry) in entries.into_iter().take(MAX_SHEETS).enumerate() {
        let xml = read_entry_bounded(&mut archive, &entry)?;
        let rows = xlsx_sheet_rows(&xml, &shared)?;
        let fallback = format!("Sheet{}", idx + 1);
        let name = sheet_names.get(idx).map(String::as_str).unwrap_or(&fallback);
        render_sheet(&mut out, name, &rows);
    }
    Ok(out)
}

/// Shared strings are optional; a workbook of only numbers has none.
fn read_shared_strings(archive: &mut Archive<'_>) -> std::result::Result<Vec<String>, ConvertError> {
    if !archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        return Ok(Vec::new());
    }
    let xml = read_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut current = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ConvertError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Sheet display names from xl/workbook.xml, in workbook order.
fn xlsx_sheet_display_names(
    archive: &mut Archive<'_>,
) -> std::result::Result<Vec<String>, ConvertError> {
    if !archive.file_names().any(|n| n == "xl/workbook.xml") {
        return Ok(Vec::new());
    }
    let xml = read_entry_bounded(archive, "xl/workbook.xml")?;
    let mut names = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e))
            | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"name" {
                            names.push(String::from_utf8_lossy(&attr.value).into_owned());
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ConvertError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn xlsx_worksheet_entries(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Cell value type from the `t` attribute.
#[derive(Clone, Copy, PartialEq)]
enum CellType {
    SharedString,
    InlineString,
    Other,
}

fn xlsx_sheet_rows(
    xml: &[u8],
    shared: &[String],
) -> std::result::Result<Vec<Vec<String>>, ConvertError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut cell_type = CellType::Other;
    let mut in_value = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    cell_type = CellType::Other;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            cell_type = match attr.value.as_ref() {
                                b"s" => CellType::SharedString,
                                b"inlineStr" => CellType::InlineString,
                                _ => CellType::Other,
                            };
                        }
                    }
                }
                b"v" => in_value = true,
                b"t" if cell_type == CellType::InlineString => in_value = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_value => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                let resolved = match cell_type {
                    CellType::SharedString => s
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i))
                        .cloned()
                        .unwrap_or_default(),
                    _ => s.to_string(),
                };
                row.push(resolved);
                cell_count += 1;
                in_value = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ConvertError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// docx

fn docx_to_text(bytes: &[u8]) -> std::result::Result<String, ConvertError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "word/document.xml")?;
    extract_text_runs(&xml)
}

/// Pull `t` run text, with a newline at each paragraph end. Shared by
/// docx (`w:t`/`w:p`) and pptx slides (`a:t`/`a:p`); the namespace
/// prefix is stripped by `local_name`.
fn extract_text_runs(xml: &[u8]) -> std::result::Result<String, ConvertError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    if !out.ends_with('\n') && !out.is_empty() {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ConvertError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// pptx

fn pptx_to_text(bytes: &[u8]) -> std::result::Result<String, ConvertError> {
    let mut archive = open_archive(bytes)?;
    let mut slide_entries: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_entries.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut out = String::new();
    for (idx, entry) in slide_entries.into_iter().enumerate() {
        let xml = read_entry_bounded(&mut archive, &entry)?;
        let text = extract_text_runs(&xml)?;
        out.push_str(&format!("# Slide {}\n", idx + 1));
        out.push_str(&text);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// ODF (ods/odt/odp)

/// odt/odp: every `text:p` paragraph in content.xml, one per line.
fn odf_to_text(bytes: &[u8]) -> std::result::Result<String, ConvertError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "content.xml")?;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut para_depth = 0usize;
    let mut current = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.name().as_ref() == b"text:p" {
                    para_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if para_depth > 0 => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.name().as_ref() == b"text:p" {
                    para_depth = para_depth.saturating_sub(1);
                    if para_depth == 0 {
                        out.push_str(current.trim());
                        out.push('\n');
                        current.clear();
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ConvertError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// ods: tables in content.xml rendered like xlsx sheets.
fn ods_to_csv(bytes: &[u8]) -> std::result::Result<String, ConvertError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "content.xml")?;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut table_name = String::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut in_cell = false;
    let mut cell_text = String::new();
    let mut cell_repeat = 1usize;
    let mut table_count = 0usize;
    let mut cell_count = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.name().as_ref() {
                b"table:table" => {
                    table_name = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"table:name")
                        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
                        .unwrap_or_else(|| format!("Sheet{}", table_count + 1));
                    rows.clear();
                    cell_count = 0;
                }
                b"table:table-row" => row.clear(),
                b"table:table-cell" => {
                    in_cell = true;
                    cell_text.clear();
                    cell_repeat = odf_repeat_count(&e);
                }
                _ => {}
            },
            // Self-closing cells are empty placeholders; keep column alignment.
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.name().as_ref() == b"table:table-cell" {
                    let repeat = odf_repeat_count(&e);
                    for _ in 0..repeat {
                        row.push(String::new());
                    }
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_cell => {
                cell_text.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.name().as_ref() {
                b"table:table-cell" => {
                    in_cell = false;
                    for _ in 0..cell_repeat {
                        row.push(cell_text.clone());
                        cell_count += 1;
                        if cell_count >= MAX_CELLS_PER_SHEET {
                            break;
                        }
                    }
                }
                b"table:table-row" => {
                    // Trailing empty cells carry no information.
                    while row.last().is_some_and(|c| c.is_empty()) {
                        row.pop();
                    }
                    if !row.is_empty() {
                        rows.push(std::mem::take(&mut row));
                    }
                }
                b"table:table" => {
                    render_sheet(&mut out, &table_name, &rows);
                    rows.clear();
                    table_count += 1;
                    if table_count >= MAX_SHEETS {
                        break;
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ConvertError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn odf_repeat_count(e: &quick_xml::events::BytesStart<'_>) -> usize {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == b"table:number-columns-repeated")
        .and_then(|a| String::from_utf8_lossy(&a.value).parse::<usize>().ok())
        .unwrap_or(1)
        .min(MAX_CELL_REPEAT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, content) in entries {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn invalid_zip_is_container_error() {
        let err = docx_to_text(b"not a zip").unwrap_err();
        assert!(matches!(err, ConvertError::Container(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let bytes = build_zip(&[(
            "word/document.xml",
            r#"<w:document xmlns:w="ns"><w:body>
                <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t> world</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second</w:t></w:r></w:p>
            </w:body></w:document>"#,
        )]);
        let text = docx_to_text(&bytes).unwrap();
        assert_eq!(text, "Hello world\nSecond\n");
    }

    #[test]
    fn pptx_slides_are_numbered_in_order() {
        let slide = |t: &str| {
            format!(
                r#"<p:sld xmlns:a="ns"><a:p><a:r><a:t>{t}</a:t></a:r></a:p></p:sld>"#
            )
        };
        let s1 = slide("first");
        let s2 = slide("second");
        let s10 = slide("tenth");
        let bytes = build_zip(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
        ]);
        let text = pptx_to_text(&bytes).unwrap();
        let first = text.find("first").unwrap();
        let second = text.find("second").unwrap();
        let tenth = text.find("tenth").unwrap();
        assert!(first < second && second < tenth);
        assert!(text.starts_with("# Slide 1\n"));
        assert!(text.contains("# Slide 3\n"));
    }

    #[test]
    fn xlsx_mixes_shared_strings_and_numbers() {
        let bytes = build_zip(&[
            (
                "xl/workbook.xml",
                r#"<workbook><sheets><sheet name="Revenue" sheetId="1"/></sheets></workbook>"#,
            ),
            (
                "xl/sharedStrings.xml",
                r#"<sst><si><t>Region</t></si><si><t>Total</t></si></sst>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData>
                    <row><c t="s"><v>0</v></c><c t="s"><v>1</v></c></row>
                    <row><c t="inlineStr"><is><t>EMEA</t></is></c><c><v>1250.5</v></c></row>
                </sheetData></worksheet>"#,
            ),
        ]);
        let csv = xlsx_to_csv(&bytes).unwrap();
        assert!(csv.starts_with("# Sheet: Revenue\n"));
        assert!(csv.contains("Region,Total\n"));
        assert!(csv.contains("EMEA,1250.5\n"));
    }

    #[test]
    fn csv_cells_with_commas_are_quoted() {
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("plain"), "plain");
    }

    #[test]
    fn ods_tables_render_with_sheet_headers() {
        let bytes = build_zip(&[(
            "content.xml",
            r#"<office:document-content xmlns:table="t" xmlns:text="x">
                <table:table table:name="Budget">
                    <table:table-row>
                        <table:table-cell><text:p>Item</text:p></table:table-cell>
                        <table:table-cell><text:p>Cost</text:p></table:table-cell>
                    </table:table-row>
                    <table:table-row>
                        <table:table-cell><text:p>Desk</text:p></table:table-cell>
                        <table:table-cell><text:p>300</text:p></table:table-cell>
                        <table:table-cell/>
                    </table:table-row>
                </table:table>
            </office:document-content>"#,
        )]);
        let csv = ods_to_csv(&bytes).unwrap();
        assert!(csv.starts_with("# Sheet: Budget\n"));
        assert!(csv.contains("Item,Cost\n"));
        assert!(csv.contains("Desk,300\n"));
    }

    #[test]
    fn odt_paragraphs_become_lines() {
        let bytes = build_zip(&[(
            "content.xml",
            r#"<office:document-content xmlns:text="x">
                <office:body><office:text>
                    <text:p>First paragraph</text:p>
                    <text:p>Second paragraph</text:p>
                </office:text></office:body>
            </office:document-content>"#,
        )]);
        let text = odf_to_text(&bytes).unwrap();
        assert_eq!(text, "First paragraph\nSecond paragraph\n");
    }

    #[test]
    fn previews_only_for_images() {
        let converter = OfficeConverter;

        let img = image::RgbImage::from_pixel(16, 16, image::Rgb([10, 20, 30]));
        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();

        assert!(converter.thumbnail(png.get_ref(), "image/png").is_some());
        assert!(converter.thumbnail(b"plain text", "text/plain").is_none());
        assert!(converter.thumbnail(b"%PDF-1.7", "application/pdf").is_none());
    }

    #[tokio::test]
    async fn converter_set_routes_by_mime() {
        let converter = OfficeConverter;
        assert!(converter.needs_conversion(MIME_XLSX));
        assert!(converter.needs_conversion(MIME_ODT));
        assert!(!converter.needs_conversion("application/pdf"));
        assert!(!converter.needs_conversion("text/plain"));

        let err = converter.convert(b"x", "application/pdf").await.unwrap_err();
        assert!(matches!(err, ConvertError::Unsupported(_)));
    }
}
