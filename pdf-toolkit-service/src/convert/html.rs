//! HTML and Markdown printed to PDF through headless Chromium.

use std::path::Path;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use futures::StreamExt;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::operation::OperationResult;

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render Markdown into a standalone HTML document
pub fn markdown_to_html_document(markdown: &str, title: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n\
         <style>body {{ font-family: sans-serif; max-width: 50em; margin: 2em auto; line-height: 1.5; }}</style>\n\
         </head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(title),
        markdown::to_html(markdown)
    )
}

fn browser_error(message: impl std::fmt::Display) -> ServiceError {
    ProcessingError::Render {
        message: format!("headless browser: {}", message),
    }
    .into()
}

async fn print_with_browser(browser: &Browser, html: &str) -> ServiceResult<Vec<u8>> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(browser_error)?;
    page.set_content(html).await.map_err(browser_error)?;
    let bytes = page
        .pdf(PrintToPdfParams::default())
        .await
        .map_err(browser_error)?;
    if let Err(e) = page.close().await {
        warn!(error = %e, "Failed to close browser page");
    }
    Ok(bytes)
}

/// Print an HTML document to PDF
#[instrument(skip_all, fields(html_len = html.len()))]
pub async fn html_to_pdf(
    html: &str,
    chrome_path: Option<&str>,
    output: &Path,
) -> ServiceResult<OperationResult> {
    if html.trim().is_empty() {
        return Err(ServiceError::invalid("HTML content cannot be empty"));
    }

    let mut builder = BrowserConfig::builder()
        .arg("--headless")
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage");
    if let Some(path) = chrome_path {
        builder = builder.chrome_executable(path);
    }
    let config = builder.build().map_err(browser_error)?;

    let (mut browser, mut handler) = Browser::launch(config).await.map_err(browser_error)?;
    let handle = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });

    let printed = print_with_browser(&browser, html).await;

    let _ = browser.close().await;
    handle.abort();

    let bytes = printed?;
    tokio::fs::write(output, &bytes)
        .await
        .map_err(ProcessingError::Io)?;

    info!(bytes = bytes.len(), "Printed HTML to PDF");
    Ok(OperationResult::ok("Converted HTML to PDF")
        .with_output(output)
        .with_data(json!({ "size": bytes.len() })))
}

pub async fn markdown_to_pdf(
    markdown: &str,
    chrome_path: Option<&str>,
    output: &Path,
) -> ServiceResult<OperationResult> {
    if markdown.trim().is_empty() {
        return Err(ServiceError::invalid("Markdown content cannot be empty"));
    }
    let title = markdown
        .lines()
        .find_map(|l| l.strip_prefix("# "))
        .unwrap_or("Document");
    let html = markdown_to_html_document(markdown, title);
    let mut result = html_to_pdf(&html, chrome_path, output).await?;
    result.message = "Converted Markdown to PDF".to_string();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_document_shell() {
        let html = markdown_to_html_document("# Title\n\n*hi*", "A <b> & c");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>A &lt;b&gt; &amp; c</title>"));
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<em>hi</em>"));
    }

    #[tokio::test]
    async fn test_empty_html_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = html_to_pdf("   ", None, &dir.path().join("x.pdf")).await;
        assert!(matches!(result, Err(ServiceError::InvalidRequest { .. })));
    }
}
