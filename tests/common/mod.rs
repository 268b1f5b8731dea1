#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use http_body_util::BodyExt;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use pdf_merge_service::config::MergeConfig;
use pdf_merge_service::{AppState, create_app};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const BOUNDARY: &str = "---------------------------123456789012345678901234567";

/// A router whose spool directory is a fresh temp dir the test can inspect
pub struct TestApp {
    pub app: Router,
    pub spool: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut MergeConfig)) -> Self {
        let spool = TempDir::new().unwrap();
        let mut config = MergeConfig::with_spool_dir(spool.path());
        config.stream_chunk_size = 512;
        config.stream_buffer_chunks = 2;
        adjust(&mut config);

        let state = AppState::new(config).unwrap();
        Self {
            app: create_app(state),
            spool,
        }
    }

    pub fn spool_entries(&self) -> Vec<PathBuf> {
        spool_entries(self.spool.path())
    }
}

pub fn spool_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    entries.sort();
    entries
}

/// One part of a multipart/form-data body
pub enum Part<'a> {
    File {
        field: &'a str,
        filename: Option<&'a str>,
        bytes: Vec<u8>,
    },
    Text {
        field: &'a str,
        value: &'a str,
    },
}

impl<'a> Part<'a> {
    pub fn pdf(filename: &'a str, bytes: Vec<u8>) -> Self {
        Part::File {
            field: "files",
            filename: Some(filename),
            bytes,
        }
    }

    pub fn filename(value: &'a str) -> Self {
        Part::Text {
            field: "filename",
            value,
        }
    }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File {
                field,
                filename,
                bytes,
            } => {
                let disposition = match filename {
                    Some(name) => format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        field, name
                    ),
                    None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", field),
                };
                body.extend_from_slice(disposition.as_bytes());
                body.extend_from_slice(b"Content-Type: application/pdf\r\n\r\n");
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
            Part::Text { field, value } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                        field, value
                    )
                    .as_bytes(),
                );
            }
        }
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Builds a PDF whose pages show `<label><n>`, with Resources and MediaBox
/// inherited from the page tree root.
pub fn sample_pdf(label: &str, pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for n in 1..=pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal(format!("{}{}", label, n))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// The `<label><n>` marker of every page, in page order
pub fn page_labels(pdf: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(pdf).unwrap();
    doc.get_pages()
        .into_values()
        .map(|id| {
            let content = String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned();
            let start = content.find('(').unwrap() + 1;
            let end = content[start..].find(')').unwrap() + start;
            content[start..end].to_string()
        })
        .collect()
}
