//! Text projections of a PDF, and plain text typeset into a PDF.

use std::path::Path;

use printpdf::{
    BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Point, Pt, TextItem,
};
use serde_json::json;
use tracing::{debug, info, instrument};

use super::html::markdown_to_html_document;
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::operation::OperationResult;
use crate::pdf::extract::{join_pages, page_texts};
use crate::pdf::{load, stem};

const A4_WIDTH_MM: f32 = 210.0;
const A4_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
const FONT_SIZE_PT: f32 = 11.0;
const LINE_HEIGHT_PT: f32 = 14.0;

fn mm_to_pt(mm: f32) -> f32 {
    mm * 72.0 / 25.4
}

/// Greedy word wrap on character counts; overlong words are broken
fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        let mut current_len = 0;
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if current_len > 0 {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                let rest = word.split_off(width);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            if current_len > 0 && current_len + 1 + word.len() > width {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current_len += word.len();
            current.extend(word);
        }
        lines.push(current);
    }
    lines
}

/// Typeset plain text onto A4 pages in 11pt Helvetica
#[instrument(skip_all, fields(title, chars = text.len()))]
pub fn text_to_pdf(text: &str, title: &str, output: &Path) -> ServiceResult<OperationResult> {
    let margin_pt = mm_to_pt(MARGIN_MM);
    let page_height_pt = mm_to_pt(A4_HEIGHT_MM);
    // Helvetica averages about half an em per glyph
    let chars_per_line =
        ((mm_to_pt(A4_WIDTH_MM) - 2.0 * margin_pt) / (FONT_SIZE_PT * 0.5)) as usize;
    let lines_per_page = ((page_height_pt - 2.0 * margin_pt) / LINE_HEIGHT_PT) as usize;

    let lines = wrap(text, chars_per_line);
    let mut pages: Vec<PdfPage> = lines
        .chunks(lines_per_page.max(1))
        .map(|chunk| {
            let ops = chunk
                .iter()
                .enumerate()
                .filter(|(_, line)| !line.is_empty())
                .flat_map(|(i, line)| {
                    let y = page_height_pt - margin_pt - FONT_SIZE_PT - i as f32 * LINE_HEIGHT_PT;
                    [
                        Op::StartTextSection,
                        Op::SetTextCursor {
                            pos: Point {
                                x: Pt(margin_pt),
                                y: Pt(y),
                            },
                        },
                        Op::SetFontSizeBuiltinFont {
                            size: Pt(FONT_SIZE_PT),
                            font: BuiltinFont::Helvetica,
                        },
                        Op::WriteTextBuiltinFont {
                            items: vec![TextItem::Text(line.clone())],
                            font: BuiltinFont::Helvetica,
                        },
                        Op::EndTextSection,
                    ]
                })
                .collect();
            PdfPage::new(Mm(A4_WIDTH_MM), Mm(A4_HEIGHT_MM), ops)
        })
        .collect();
    if pages.is_empty() {
        pages.push(PdfPage::new(Mm(A4_WIDTH_MM), Mm(A4_HEIGHT_MM), Vec::new()));
    }

    let page_count = pages.len();
    let mut doc = PdfDocument::new(title);
    doc.with_pages(pages);
    let mut warnings: Vec<PdfWarnMsg> = Vec::new();
    let bytes = doc.save(&PdfSaveOptions::default(), &mut warnings);
    std::fs::write(output, bytes).map_err(ProcessingError::Io)?;
    debug!(lines = lines.len(), pages = page_count, "Typeset text");

    Ok(OperationResult::ok(format!("Created a {}-page PDF", page_count))
        .with_output(output)
        .with_data(json!({ "pages": page_count, "lines": lines.len() })))
}

/// Join wrapped lines back into paragraphs. A blank line or sentence-ending
/// punctuation closes a paragraph.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(line);
        if line.ends_with(['.', '!', '?', ':']) {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Markdown view of a document: a title, then one section per page
pub fn markdown_from_pages(title: &str, pages: &[(u32, String)]) -> String {
    let mut markdown = format!("# {}\n", title);
    for (number, text) in pages {
        markdown.push_str(&format!("\n## Page {}\n\n", number));
        for paragraph in paragraphs(text) {
            // A leading '#' would turn extracted text into a heading
            if paragraph.starts_with('#') {
                markdown.push('\\');
            }
            markdown.push_str(&paragraph);
            markdown.push_str("\n\n");
        }
    }
    markdown
}

fn write_output(output_dir: &Path, name: String, content: &str) -> ServiceResult<std::path::PathBuf> {
    let path = output_dir.join(name);
    std::fs::write(&path, content).map_err(ProcessingError::Io)?;
    Ok(path)
}

fn page_text_or_fail(input: &Path) -> ServiceResult<(Vec<(u32, String)>, Vec<String>)> {
    let doc = load(input)?;
    let (pages, warnings) = page_texts(&doc);
    if pages.is_empty() {
        return Err(ServiceError::Processing(ProcessingError::Conversion {
            message: "document has no pages".to_string(),
        }));
    }
    Ok((pages, warnings))
}

#[instrument(skip_all, fields(input = %input.display()))]
pub fn pdf_to_text(input: &Path, output_dir: &Path) -> ServiceResult<OperationResult> {
    let (pages, warnings) = page_text_or_fail(input)?;
    let text = join_pages(&pages, true);
    let path = write_output(output_dir, format!("{}.txt", stem(input)), &text)?;

    info!(pages = pages.len(), "Converted PDF to text");
    Ok(OperationResult::ok("Converted PDF to text")
        .with_output(&path)
        .with_warnings(warnings)
        .with_data(json!({ "pages": pages.len(), "characters": text.chars().count() })))
}

#[instrument(skip_all, fields(input = %input.display()))]
pub fn pdf_to_markdown(input: &Path, output_dir: &Path) -> ServiceResult<OperationResult> {
    let (pages, warnings) = page_text_or_fail(input)?;
    let name = stem(input);
    let markdown = markdown_from_pages(&name, &pages);
    let path = write_output(output_dir, format!("{}.md", name), &markdown)?;

    info!(pages = pages.len(), "Converted PDF to Markdown");
    Ok(OperationResult::ok("Converted PDF to Markdown")
        .with_output(&path)
        .with_warnings(warnings)
        .with_data(json!({ "pages": pages.len() })))
}

#[instrument(skip_all, fields(input = %input.display()))]
pub fn pdf_to_html(input: &Path, output_dir: &Path) -> ServiceResult<OperationResult> {
    let (pages, warnings) = page_text_or_fail(input)?;
    let name = stem(input);
    let html = markdown_to_html_document(&markdown_from_pages(&name, &pages), &name);
    let path = write_output(output_dir, format!("{}.html", name), &html)?;

    info!(pages = pages.len(), "Converted PDF to HTML");
    Ok(OperationResult::ok("Converted PDF to HTML")
        .with_output(&path)
        .with_warnings(warnings)
        .with_data(json!({ "pages": pages.len() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::testing::write_pdf;

    #[test]
    fn test_wrap_breaks_on_width() {
        let lines = wrap("alpha beta gamma delta", 11);
        assert_eq!(lines, vec!["alpha beta", "gamma delta"]);
        let long = wrap("abcdefghij", 4);
        assert_eq!(long, vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap("one\n\ntwo", 10), vec!["one", "", "two"]);
    }

    #[test]
    fn test_paragraphs_join_wrapped_lines() {
        let text = "The quick brown\nfox jumps.\nSecond one\n\nThird";
        assert_eq!(
            paragraphs(text),
            vec!["The quick brown fox jumps.", "Second one", "Third"]
        );
    }

    #[test]
    fn test_markdown_has_page_sections() {
        let pages = vec![(1, "# not a heading".to_string()), (2, "Body.".to_string())];
        let markdown = markdown_from_pages("report", &pages);
        assert!(markdown.starts_with("# report\n"));
        assert!(markdown.contains("## Page 1"));
        assert!(markdown.contains("\\# not a heading"));
        assert!(markdown.contains("## Page 2\n\nBody."));
    }

    #[test]
    fn test_text_to_pdf_paginates() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("long.pdf");
        let text = (0..200).map(|i| format!("Line {}", i)).collect::<Vec<_>>().join("\n");

        let result = text_to_pdf(&text, "Long", &output).unwrap();

        let pages = result.data.unwrap()["pages"].as_u64().unwrap();
        assert!(pages >= 3);
        assert_eq!(lopdf::Document::load(&output).unwrap().get_pages().len() as u64, pages);
    }

    #[test]
    fn test_pdf_to_html_and_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_pdf(dir.path(), "notes.pdf", &[vec!["Hello world."], vec!["Bye."]]);

        pdf_to_markdown(&input, dir.path()).unwrap();
        let markdown = std::fs::read_to_string(dir.path().join("notes.md")).unwrap();
        assert!(markdown.contains("## Page 2"));
        assert!(markdown.contains("Hello world."));

        pdf_to_html(&input, dir.path()).unwrap();
        let html = std::fs::read_to_string(dir.path().join("notes.html")).unwrap();
        assert!(html.contains("<h2>Page 1</h2>"));
        assert!(html.contains("<title>notes</title>"));
    }
}
