// SPDX-License-Identifier: Apache-2.0

//! Runner jobdata intake.
//!
//! A jobdata stream is newline-separated text whose trailing line carries a
//! base64-encoded ZIP of the project payload, suffixed with an
//! `{"eof": true}` framing marker. The payload is extracted into a fresh
//! temporary directory that is removed when the returned guard drops.

use std::fs;
use std::io::Read;
use std::path::Path;

use base64::Engine as _;

use crate::Error;

/// Extracts the project payload of a jobdata stream into `workdir`.
pub fn prepare_project_dir_from_jobdata(jobdata: &str, workdir: &Path) -> Result<(), Error> {
    let lines: Vec<&str> = jobdata.lines().filter(|line| !line.is_empty()).collect();
    let Some(last_line) = lines.last() else {
        return Err(Error::InputError {
            error: "jobdata stream is empty".to_owned(),
        });
    };
    let encoded = last_line.replace("{\"eof\": true}", "");

    let zip_bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::InputError {
            error: format!("jobdata payload is not valid base64: {e}"),
        })?;

    extract_zip(&zip_bytes, workdir)
}

fn extract_zip(zip_bytes: &[u8], workdir: &Path) -> Result<(), Error> {
    let reader = std::io::Cursor::new(zip_bytes);
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| Error::InputError {
        error: format!("jobdata payload is not a valid zip archive: {e}"),
    })?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| Error::InputError {
            error: format!("failed to read zip entry: {e}"),
        })?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = workdir.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| Error::InputError {
                error: format!("failed to create `{}`: {e}", out_path.display()),
            })?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::InputError {
                error: format!("failed to create `{}`: {e}", parent.display()),
            })?;
        }
        let mut contents = Vec::new();
        _ = entry
            .read_to_end(&mut contents)
            .map_err(|e| Error::InputError {
                error: format!("failed to extract zip entry: {e}"),
            })?;
        fs::write(&out_path, contents).map_err(|e| Error::InputError {
            error: format!("failed to write `{}`: {e}", out_path.display()),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_jobdata(files: &[(&str, &str)]) -> String {
        let mut buffer = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buffer);
            let mut writer = zip::ZipWriter::new(cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, content) in files {
                writer.start_file(*name, options).expect("start file");
                writer.write_all(content.as_bytes()).expect("write file");
            }
            _ = writer.finish().expect("finish zip");
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(&buffer);
        format!("{{\"status\": \"ok\"}}\n\n{encoded}{{\"eof\": true}}\n")
    }

    #[test]
    fn test_extract_jobdata_payload() {
        let jobdata = make_jobdata(&[("project/site.yml", "- hosts: all\n")]);
        let workdir = tempfile::tempdir().expect("tempdir");
        prepare_project_dir_from_jobdata(&jobdata, workdir.path()).expect("extract");
        let extracted = workdir.path().join("project/site.yml");
        assert_eq!(
            fs::read_to_string(extracted).expect("read"),
            "- hosts: all\n"
        );
    }

    #[test]
    fn test_empty_stream_is_an_error() {
        let workdir = tempfile::tempdir().expect("tempdir");
        assert!(prepare_project_dir_from_jobdata("", workdir.path()).is_err());
    }

    #[test]
    fn test_garbage_payload_is_an_error() {
        let workdir = tempfile::tempdir().expect("tempdir");
        let result = prepare_project_dir_from_jobdata("not base64 at all!!\n", workdir.path());
        assert!(result.is_err());
    }
}
