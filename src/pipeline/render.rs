//! PDF rasterisation: turn selected pages into [`PageUnit`]s via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and does CPU-heavy work. [`render_document`] moves each document
//! onto Tokio's blocking pool so inference calls for other documents keep
//! flowing while a page is being rasterised.
//!
//! ## Why cap pixels as well as scale?
//!
//! Reports are mostly Letter/A4, where a 2× scale gives ~1700 × 2200 px. A
//! stray A0 exhibit at the same scale would be enormous, so
//! `max_rendered_pixels` bounds both edges regardless of physical size.

use crate::config::{ExtractionConfig, ImageEncoding, PagePolicy};
use crate::error::{ExtractError, PageError};
use crate::output::PageUnit;
use crate::pipeline::encode::encode_page;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a document is turned into page units.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub policy: PagePolicy,
    /// Following pages whose text is appended to each page's own text.
    pub support_pages: usize,
    pub scale: f32,
    pub max_pixels: u32,
    pub format: ImageEncoding,
}

impl RenderOptions {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            policy: config.pages,
            support_pages: config.support_pages,
            scale: config.image_scale,
            max_pixels: config.max_rendered_pixels,
            format: config.image_format,
        }
    }
}

/// Output of rendering one document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedDocument {
    /// Pages in the whole document, not just the selection.
    pub total_pages: usize,
    /// Successfully rendered selected pages, in page order.
    pub pages: Vec<PageUnit>,
    /// Selected pages that could not be rendered.
    pub page_errors: Vec<PageError>,
    /// Text of page 1 plus its support pages; used for document signals.
    pub opening_text: String,
}

impl RenderedDocument {
    /// Number of pages the policy selected (rendered or not).
    pub fn selected_pages(&self) -> usize {
        self.pages.len() + self.page_errors.len()
    }
}

/// Something that can open a PDF and rasterise its pages.
///
/// Implementations are blocking; [`render_document`] runs them on the
/// blocking pool.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, path: &Path, options: &RenderOptions) -> Result<RenderedDocument, ExtractError>;
}

/// Render a document off the async executor.
pub async fn render_document(
    renderer: Arc<dyn DocumentRenderer>,
    path: &Path,
    options: &RenderOptions,
) -> Result<RenderedDocument, ExtractError> {
    let path: PathBuf = path.to_path_buf();
    let options = options.clone();
    tokio::task::spawn_blocking(move || renderer.render(&path, &options))
        .await
        .map_err(|e| ExtractError::Internal(format!("Render task panicked: {}", e)))?
}

/// This page's text followed by the text of up to `support_pages` following
/// pages, separated by blank lines.
pub fn support_text(page_texts: &[String], index: usize, support_pages: usize) -> String {
    let end = index
        .saturating_add(support_pages)
        .saturating_add(1)
        .min(page_texts.len());
    if index >= end {
        return String::new();
    }
    page_texts[index..end]
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Production renderer backed by pdfium (bound through `pdfium-auto`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumRenderer;

impl DocumentRenderer for PdfiumRenderer {
    fn render(&self, path: &Path, options: &RenderOptions) -> Result<RenderedDocument, ExtractError> {
        let pdfium = pdfium_auto::bind_pdfium_silent()
            .map_err(|e| ExtractError::PdfiumBindingFailed(e.to_string()))?;

        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| ExtractError::UnreadablePdf {
                path: path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        if total_pages == 0 {
            return Err(ExtractError::UnreadablePdf {
                path: path.to_path_buf(),
                detail: "document has no pages".into(),
            });
        }
        let selected = options.policy.to_indices(total_pages);
        info!("PDF loaded: {} pages, {} selected", total_pages, selected.len());

        // Text is only needed up to the last selected page's support window
        // and for the opening window used by the classifiers.
        let last_selected = selected.last().copied().unwrap_or(0);
        let text_upto = last_selected
            .saturating_add(options.support_pages)
            .saturating_add(1)
            .min(total_pages);
        let page_texts: Vec<String> = (0..text_upto)
            .map(|idx| {
                pages
                    .get(idx as u16)
                    .and_then(|page| page.text().map(|t| t.all()))
                    .unwrap_or_else(|e| {
                        debug!("Page {}: no text layer ({:?})", idx + 1, e);
                        String::new()
                    })
            })
            .collect();

        let max_pixels = i32::try_from(options.max_pixels).unwrap_or(i32::MAX);
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(options.scale)
            .set_maximum_width(max_pixels)
            .set_maximum_height(max_pixels);

        let mut units = Vec::with_capacity(selected.len());
        let mut page_errors = Vec::new();

        for idx in selected {
            let page_num = idx + 1;
            let rendered = pages
                .get(idx as u16)
                .and_then(|page| {
                    page.render_with_config(&render_config)
                        .map(|bitmap| bitmap.as_image())
                })
                .map_err(|e| format!("{:?}", e))
                .and_then(|img| {
                    debug!("Rendered page {} → {}x{} px", page_num, img.width(), img.height());
                    encode_page(&img, options.format).map_err(|e| e.to_string())
                });

            match rendered {
                Ok(bytes) if !bytes.is_empty() => units.push(PageUnit {
                    page_index: page_num,
                    image_bytes: bytes,
                    support_text: support_text(&page_texts, idx, options.support_pages),
                    is_first_page: idx == 0,
                }),
                Ok(_) => page_errors.push(PageError::RenderFailed {
                    page: page_num,
                    detail: "encoder produced no bytes".into(),
                }),
                Err(detail) => {
                    warn!("Page {}: rasterisation failed: {}", page_num, detail);
                    page_errors.push(PageError::RenderFailed {
                        page: page_num,
                        detail,
                    });
                }
            }
        }

        Ok(RenderedDocument {
            total_pages,
            pages: units,
            page_errors,
            opening_text: support_text(&page_texts, 0, options.support_pages),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("page {i}")).collect()
    }

    #[test]
    fn test_support_text_window() {
        let t = texts(5);
        assert_eq!(support_text(&t, 0, 2), "page 1\n\npage 2\n\npage 3");
        assert_eq!(support_text(&t, 3, 3), "page 4\n\npage 5");
        assert_eq!(support_text(&t, 4, 0), "page 5");
        assert_eq!(support_text(&t, 9, 3), "");
    }

    #[test]
    fn test_support_text_skips_blank_pages() {
        let t = vec!["Jane Doe".to_string(), "   ".to_string(), "Analyst".to_string()];
        assert_eq!(support_text(&t, 0, 2), "Jane Doe\n\nAnalyst");
    }

    #[test]
    fn test_render_options_from_config() {
        let config = ExtractionConfig::builder()
            .support_pages(1)
            .image_scale(1.5)
            .build()
            .unwrap();
        let o = RenderOptions::from_config(&config);
        assert_eq!(o.support_pages, 1);
        assert_eq!(o.scale, 1.5);
        assert_eq!(o.format, ImageEncoding::Jpeg);
        assert!(o.policy.always_include_first);
    }

    #[test]
    fn test_selected_pages_counts_failures() {
        let doc = RenderedDocument {
            total_pages: 4,
            pages: vec![PageUnit {
                page_index: 1,
                image_bytes: vec![1],
                support_text: String::new(),
                is_first_page: true,
            }],
            page_errors: vec![PageError::RenderFailed {
                page: 2,
                detail: "x".into(),
            }],
            opening_text: String::new(),
        };
        assert_eq!(doc.selected_pages(), 2);
    }

    #[tokio::test]
    async fn test_render_document_propagates_renderer_error() {
        struct Broken;
        impl DocumentRenderer for Broken {
            fn render(&self, path: &Path, _o: &RenderOptions) -> Result<RenderedDocument, ExtractError> {
                Err(ExtractError::UnreadablePdf {
                    path: path.to_path_buf(),
                    detail: "xref".into(),
                })
            }
        }
        let config = ExtractionConfig::default();
        let err = render_document(
            Arc::new(Broken),
            Path::new("/tmp/a.pdf"),
            &RenderOptions::from_config(&config),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractError::UnreadablePdf { .. }));
    }
}
