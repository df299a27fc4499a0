//! In-memory ZIP assembly and deterministic entry naming.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use once_cell::sync::Lazy;
use regex_lite::Regex;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::repository::Invoice;

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1F\x7F]"#).unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const MAX_BASE_LEN: usize = 120;

/// Strip filesystem-unsafe characters and collapse whitespace.
///
/// Tabs and line breaks count as whitespace, not as control characters.
pub fn sanitize_component(raw: &str) -> String {
    let spaced = WHITESPACE.replace_all(raw, " ");
    let stripped = UNSAFE_CHARS.replace_all(&spaced, "");
    let collapsed = WHITESPACE.replace_all(stripped.trim(), " ");
    collapsed.trim_start_matches('.').trim().to_string()
}

/// `<invoice number>_<seller>` for an invoice, falling back to its id when
/// the number is missing.
pub fn entry_base_name(invoice: &Invoice) -> String {
    let clean = |value: Option<&str>| {
        value
            .map(sanitize_component)
            .filter(|s| !s.is_empty())
    };
    let id = clean(Some(&invoice.id)).unwrap_or_else(|| "invoice".to_string());
    let number = clean(invoice.invoice_number.as_deref()).unwrap_or(id);

    let base = match clean(invoice.seller_name.as_deref()) {
        Some(seller) => format!("{}_{}", number, seller),
        None => number,
    };
    truncate(base, MAX_BASE_LEN)
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

/// Hands out unique `.pdf` entry names in request order.
#[derive(Debug, Default)]
pub struct EntryNamer {
    used: HashSet<String>,
}

impl EntryNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name for `base`, suffixed `-2`, `-3`... on collision.
    pub fn unique(&mut self, base: &str) -> String {
        let first = format!("{}.pdf", base);
        if self.used.insert(first.to_lowercase()) {
            return first;
        }
        let mut idx = 2usize;
        loop {
            let candidate = format!("{}-{}.pdf", base, idx);
            if self.used.insert(candidate.to_lowercase()) {
                return candidate;
            }
            idx += 1;
        }
    }
}

/// Encode `entries` as a deflate ZIP. Entries keep their order.
pub fn build_zip(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, ZipError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in entries {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(bytes)?;
    }

    Ok(writer.finish()?.into_inner())
}

/// Turns named entries into archive bytes.
pub trait ArchiveEncoder: Send + Sync {
    fn encode(&self, entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, ZipError>;
}

/// The default encoder, backed by [`build_zip`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipEncoder;

impl ArchiveEncoder for ZipEncoder {
    fn encode(&self, entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>, ZipError> {
        build_zip(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InvoiceStatus;
    use chrono::Utc;
    use zip::ZipArchive;

    fn invoice(id: &str, number: Option<&str>, seller: Option<&str>) -> Invoice {
        Invoice {
            id: id.to_string(),
            invoice_number: number.map(str::to_string),
            seller_name: seller.map(str::to_string),
            amount_cents: 0,
            status: InvoiceStatus::Recognized,
            file_ref: Some("files/x.pdf".to_string()),
            file_name: "x.pdf".to_string(),
            set_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("ACME / Co: \"Ltd\"?"), "ACME Co Ltd");
        assert_eq!(sanitize_component("  a\tb\n c  "), "a b c");
        assert_eq!(sanitize_component("..hidden"), "hidden");
        assert_eq!(sanitize_component("<>|*"), "");
        assert_eq!(sanitize_component("a\x07b"), "ab");
    }

    #[test]
    fn test_entry_base_name_fallbacks() {
        assert_eq!(
            entry_base_name(&invoice("inv-1", Some("2024-001"), Some("ACME"))),
            "2024-001_ACME"
        );
        assert_eq!(entry_base_name(&invoice("inv-1", Some("2024-001"), None)), "2024-001");
        assert_eq!(entry_base_name(&invoice("inv-1", None, Some("ACME"))), "inv-1_ACME");
        assert_eq!(entry_base_name(&invoice("inv-1", Some("??"), Some(" "))), "inv-1");
        assert_eq!(
            entry_base_name(&invoice("inv-1", Some("1"), Some("ACME\nTrading"))),
            "1_ACME Trading"
        );
    }

    #[test]
    fn test_long_names_truncated_on_char_boundary() {
        let seller = "é".repeat(200);
        let name = entry_base_name(&invoice("inv-1", Some("1"), Some(&seller)));
        assert!(name.len() <= MAX_BASE_LEN);
        assert!(name.starts_with("1_é"));
    }

    #[test]
    fn test_collisions_get_suffixes() {
        let mut namer = EntryNamer::new();
        assert_eq!(namer.unique("A"), "A.pdf");
        assert_eq!(namer.unique("A"), "A-2.pdf");
        assert_eq!(namer.unique("a"), "a-3.pdf");
        assert_eq!(namer.unique("A-2"), "A-2-2.pdf");
    }

    #[test]
    fn test_build_zip_keeps_order() {
        let entries = vec![
            ("b.pdf".to_string(), b"%PDF-b".to_vec()),
            ("a.pdf".to_string(), b"%PDF-a".to_vec()),
        ];
        let bytes = build_zip(&entries).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.by_index(0).unwrap().name(), "b.pdf");
        assert_eq!(archive.by_index(1).unwrap().name(), "a.pdf");
    }

    #[test]
    fn test_build_zip_rejects_duplicate_entries() {
        let entries = vec![
            ("a.pdf".to_string(), b"%PDF-1".to_vec()),
            ("a.pdf".to_string(), b"%PDF-2".to_vec()),
        ];
        assert!(ZipEncoder.encode(&entries).is_err());
    }
}
