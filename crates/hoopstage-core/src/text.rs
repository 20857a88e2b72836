// Delimited-text input and output.
//
// Season exports and name-fixer sheets come out of spreadsheets, so they may
// be UTF-8 (with or without a BOM) or a Windows code page. Files are decoded
// by trying an ordered list of encodings; every value is kept as text.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::persist::{write_atomic, PersistError};
use crate::table::TextTable;

// ---------------------------------------------------------------------------
// Encodings
// ---------------------------------------------------------------------------

/// Text encodings accepted for delimited input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    /// UTF-8; a leading byte-order mark is dropped.
    Utf8,
    /// Windows-1252, rejecting the five bytes the code page leaves undefined.
    Windows1252,
    /// ISO-8859-1. Decodes any byte sequence.
    Latin1,
}

/// Default decode order: UTF-8 first, then the code pages Excel produces.
pub const DEFAULT_ENCODINGS: &[TextEncoding] = &[
    TextEncoding::Utf8,
    TextEncoding::Windows1252,
    TextEncoding::Latin1,
];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const CP1252_UNDEFINED: &[u8] = &[0x81, 0x8D, 0x8F, 0x90, 0x9D];

impl TextEncoding {
    /// Decode `bytes` strictly, returning `None` if they are not valid in
    /// this encoding.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => {
                let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                std::str::from_utf8(body).ok().map(str::to_string)
            }
            TextEncoding::Windows1252 => {
                if bytes.iter().any(|b| CP1252_UNDEFINED.contains(b)) {
                    return None;
                }
                WINDOWS_1252
                    .decode_without_bom_handling_and_without_replacement(bytes)
                    .map(|text| text.into_owned())
            }
            TextEncoding::Latin1 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Windows1252 => "windows-1252",
            TextEncoding::Latin1 => "latin-1",
        })
    }
}

/// Decode with the first encoding that accepts the bytes.
pub fn decode_first(bytes: &[u8], encodings: &[TextEncoding]) -> Option<(String, TextEncoding)> {
    encodings
        .iter()
        .find_map(|enc| enc.decode(bytes).map(|text| (text, *enc)))
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TextReadError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not decode {path} with any of: {}", join_encodings(.tried))]
    Undecodable {
        path: PathBuf,
        tried: Vec<TextEncoding>,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

fn join_encodings(encodings: &[TextEncoding]) -> String {
    encodings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parse comma-separated text with a header row. Every record must have as
/// many fields as the header.
pub fn parse_csv<R: Read>(rdr: R) -> Result<TextTable, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(rdr);
    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(TextTable::new(headers, rows))
}

/// Read and decode a CSV file, trying `encodings` in order.
pub fn read_text_table(
    path: &Path,
    encodings: &[TextEncoding],
) -> Result<TextTable, TextReadError> {
    let bytes = std::fs::read(path).map_err(|e| TextReadError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let Some((text, encoding)) = decode_first(&bytes, encodings) else {
        return Err(TextReadError::Undecodable {
            path: path.to_path_buf(),
            tried: encodings.to_vec(),
        });
    };
    debug!("decoded {} as {}", path.display(), encoding);
    parse_csv(text.as_bytes()).map_err(|e| TextReadError::Csv {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Every `*.csv` file directly inside `dir`, sorted by file name.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>, TextReadError> {
    let entries = std::fs::read_dir(dir).map_err(|e| TextReadError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TextReadError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if path.is_file() && is_csv {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Atomically write a UTF-8 CSV with one header row.
pub fn write_csv(path: &Path, headers: &[String], rows: &[Vec<String>]) -> Result<(), PersistError> {
    write_atomic(path, |out| {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(headers)?;
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok::<(), csv::Error>(())
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
