use std::fmt::Write as _;

/// Extension every uploaded document must carry (compared case-insensitively)
pub const DOCUMENT_EXTENSION: &str = ".pdf";

/// Download name used when the client does not request one
pub const DEFAULT_OUTPUT_FILENAME: &str = "merged_output.pdf";

/// Longest output filename we put into a Content-Disposition header
const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn has_document_extension(name: &str) -> bool {
    name.to_lowercase().ends_with(DOCUMENT_EXTENSION)
}

/// Validates a single upload's filename before any of its bytes are spooled.
/// A part without a filename is rejected rather than treated as anonymous.
/// The name is checked as sent; trailing whitespace after `.pdf` fails.
pub fn check_upload_name(name: Option<&str>) -> Result<&str, ValidationError> {
    let name = name.filter(|n| !n.trim().is_empty()).ok_or_else(|| {
        ValidationError {
            code: "MISSING_FILENAME",
            message: "Every uploaded file must carry a filename".to_string(),
        }
    })?;

    if !has_document_extension(name) {
        return Err(ValidationError {
            code: "INVALID_EXTENSION",
            message: format!(
                "File '{}' is not a {} document",
                name,
                DOCUMENT_EXTENSION.trim_start_matches('.').to_uppercase()
            ),
        });
    }

    Ok(name)
}

/// Rejects a request that carried no files at all
pub fn check_upload_count(count: usize) -> Result<(), ValidationError> {
    if count == 0 {
        return Err(ValidationError {
            code: "NO_FILES",
            message: "At least one file must be uploaded in the 'files' field".to_string(),
        });
    }
    Ok(())
}

/// Turns the client-requested download name into a safe `.pdf` filename.
///
/// Path components are dropped and characters that would break a quoted
/// Content-Disposition value are replaced. Applying it twice yields the same
/// name as applying it once.
pub fn normalize_output_filename(requested: Option<&str>) -> String {
    let requested = requested.map(str::trim).unwrap_or_default();

    // Only keep the final path component, whichever separator the client used
    let name = requested
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control() || c == '"' || c == ':' || c == '*' || c == '?' || c == '<'
                || c == '>' || c == '|' || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        return DEFAULT_OUTPUT_FILENAME.to_string();
    }

    let mut sanitized = if has_document_extension(&sanitized) {
        sanitized
    } else {
        format!("{}{}", sanitized, DOCUMENT_EXTENSION)
    };

    // Limit length safely for UTF-8, keeping the extension intact
    if sanitized.len() > MAX_FILENAME_LEN {
        let mut end = MAX_FILENAME_LEN - DOCUMENT_EXTENSION.len();
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized.truncate(end);
        sanitized.push_str(DOCUMENT_EXTENSION);
    }

    sanitized
}

/// Builds the Content-Disposition value for a normalized download name
pub fn content_disposition(filename: &str) -> String {
    format!("attachment; filename=\"{}\"", filename)
}

/// Format file size as human-readable string.
pub fn format_file_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

/// Sizes reported by the diagnostic validate endpoint
#[derive(Debug, Default)]
pub struct UploadSummary {
    files: Vec<(String, u64)>,
}

impl UploadSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: impl Into<String>, size: u64) {
        self.files.push((name.into(), size));
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|(_, size)| size).sum()
    }

    /// Plaintext report; appends an advisory line when the total exceeds `warn_above`.
    pub fn render(&self, warn_above: u64) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Files received: {}", self.file_count());

        for (index, (name, size)) in self.files.iter().enumerate() {
            let marker = if has_document_extension(name) {
                ""
            } else {
                " [not a PDF]"
            };
            let _ = writeln!(
                out,
                "  {}. {} ({}){}",
                index + 1,
                name,
                format_file_size(*size),
                marker
            );
        }

        let total = self.total_size();
        let _ = writeln!(out, "Total size: {}", format_file_size(total));

        if total > warn_above {
            let _ = writeln!(
                out,
                "WARNING: total size exceeds {}; merging may be slow",
                format_file_size(warn_above)
            );
        }

        out
    }
}
