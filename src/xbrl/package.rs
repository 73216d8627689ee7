use std::io::{Cursor, Read};

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use zip::ZipArchive;

use crate::error::{Error, Result};

/// 超過此大小的文件在解析前直接拒絕
pub const MAX_DOCUMENT_BYTES: usize = 50 * 1024 * 1024;

/// MOPS 財報 instance 檔的命名慣例，例：`tifrs-fr0-m1-ci-cr-2330-2024Q3.html`
static INSTANCE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^tifrs-fr.*-ci-.*\.html?$").expect("instance name pattern"));

/// 解開後的 XBRL 封裝：檔名 → 內容，加上已辨識的 instance 與 linkbase 路徑
#[derive(Debug, Default)]
pub struct XbrlArchive {
    pub files: HashMap<String, Vec<u8>>,
    pub instance_path: String,
    pub calculation_paths: Vec<String>,
    pub presentation_paths: Vec<String>,
    pub label_paths: Vec<String>,
}

impl XbrlArchive {
    /// 沒有封裝的裸 instance（MOPS 直接回傳 iXBRL HTML 時）
    pub fn from_instance(content: Vec<u8>) -> Self {
        let instance_path = "instance.html".to_string();
        let mut files = HashMap::new();
        files.insert(instance_path.clone(), content);

        XbrlArchive {
            files,
            instance_path,
            ..Default::default()
        }
    }

    pub fn instance_bytes(&self) -> &[u8] {
        self.files
            .get(&self.instance_path)
            .map(|bytes| bytes.as_slice())
            .unwrap_or_default()
    }
}

/// 解壓縮 XBRL ZIP 並辨識 instance 文件。
///
/// Instance 偵測順序：
/// 1. 檔名符合 `tifrs-fr*-ci-*.htm[l]` 的 iXBRL
/// 2. 根節點為 `<xbrli:xbrl>` 的 `.xml`
/// 3. 最大的 `.htm` 檔
///
/// 找不到 instance 或封裝超過大小上限時回傳 [`Error::MalformedPackage`]。
pub fn unpack(zip_bytes: &[u8]) -> Result<XbrlArchive> {
    if zip_bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(Error::MalformedPackage(format!(
            "package of {} bytes exceeds the {} byte limit",
            zip_bytes.len(),
            MAX_DOCUMENT_BYTES
        )));
    }

    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))
        .map_err(|why| Error::MalformedPackage(format!("not a zip archive: {}", why)))?;

    let mut files: HashMap<String, Vec<u8>> = HashMap::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|why| Error::MalformedPackage(format!("zip entry {}: {}", index, why)))?;

        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|why| Error::MalformedPackage(format!("zip entry {}: {}", name, why)))?;
        files.insert(name, content);
    }

    let instance_path = find_instance(&files).ok_or_else(|| {
        Error::MalformedPackage("no instance document found in package".to_string())
    })?;

    let mut unpacked = XbrlArchive {
        instance_path,
        ..Default::default()
    };

    for name in files.keys() {
        let lower = name.to_lowercase();
        if lower.ends_with("_cal.xml") {
            unpacked.calculation_paths.push(name.clone());
        } else if lower.ends_with("_pre.xml") {
            unpacked.presentation_paths.push(name.clone());
        } else if lower.ends_with("_lab.xml") {
            unpacked.label_paths.push(name.clone());
        }
    }

    unpacked.calculation_paths.sort();
    unpacked.presentation_paths.sort();
    unpacked.label_paths.sort();
    unpacked.files = files;

    Ok(unpacked)
}

fn find_instance(files: &HashMap<String, Vec<u8>>) -> Option<String> {
    // 1. iXBRL 命名慣例
    if let Some(name) = files
        .keys()
        .filter(|name| INSTANCE_NAME.is_match(basename(name)))
        .min_by(|a, b| a.as_str().cmp(b.as_str()))
    {
        return Some(name.clone());
    }

    // 2. 根節點為 <xbrli:xbrl> 的 XML（排除 linkbase 與 schema）
    if let Some(name) = files
        .iter()
        .filter(|(name, content)| {
            let lower = name.to_lowercase();
            lower.ends_with(".xml")
                && !lower.ends_with("_cal.xml")
                && !lower.ends_with("_pre.xml")
                && !lower.ends_with("_lab.xml")
                && !lower.ends_with("_def.xml")
                && !lower.ends_with("_ref.xml")
                && contains_xbrl_root(content)
        })
        .map(|(name, _)| name)
        .min_by(|a, b| a.as_str().cmp(b.as_str()))
    {
        return Some(name.clone());
    }

    // 3. 最大的 .htm 檔
    files
        .iter()
        .filter(|(name, _)| {
            let lower = name.to_lowercase();
            lower.ends_with(".htm") || lower.ends_with(".html")
        })
        .max_by_key(|(_, content)| content.len())
        .map(|(name, _)| name.clone())
}

fn contains_xbrl_root(content: &[u8]) -> bool {
    content
        .windows(b"<xbrli:xbrl".len())
        .any(|window| window == b"<xbrli:xbrl")
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::FileOptions;

    use super::*;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, content) in entries {
                writer
                    .start_file(*name, FileOptions::default())
                    .unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_unpack_prefers_ixbrl_instance() {
        let zip_bytes = build_zip(&[
            ("tifrs-fr0-m1-ci-cr-2330-2024Q3.html", b"<html></html>"),
            ("tifrs-fr0-m1-ci-cr-2330-2024Q3_cal.xml", b"<linkbase/>"),
            ("tifrs-fr0-m1-ci-cr-2330-2024Q3_pre.xml", b"<linkbase/>"),
            ("tifrs-fr0-m1-ci-cr-2330-2024Q3_lab.xml", b"<linkbase/>"),
        ]);

        let archive = unpack(&zip_bytes).unwrap();
        assert_eq!(
            archive.instance_path,
            "tifrs-fr0-m1-ci-cr-2330-2024Q3.html"
        );
        assert_eq!(archive.calculation_paths.len(), 1);
        assert_eq!(archive.presentation_paths.len(), 1);
        assert_eq!(archive.label_paths.len(), 1);
    }

    #[test]
    fn test_unpack_falls_back_to_xbrl_xml() {
        let zip_bytes = build_zip(&[
            ("report_cal.xml", b"<linkbase/>"),
            (
                "report.xml",
                b"<?xml version=\"1.0\"?><xbrli:xbrl xmlns:xbrli=\"x\"></xbrli:xbrl>",
            ),
        ]);

        let archive = unpack(&zip_bytes).unwrap();
        assert_eq!(archive.instance_path, "report.xml");
    }

    #[test]
    fn test_unpack_falls_back_to_largest_htm() {
        let zip_bytes = build_zip(&[
            ("small.htm", b"<html/>"),
            ("large.htm", b"<html><body>facts facts facts</body></html>"),
        ]);

        let archive = unpack(&zip_bytes).unwrap();
        assert_eq!(archive.instance_path, "large.htm");
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert!(matches!(
            unpack(b"not a zip"),
            Err(Error::MalformedPackage(_))
        ));

        let zip_bytes = build_zip(&[("notes.txt", b"hello")]);
        assert!(matches!(
            unpack(&zip_bytes),
            Err(Error::MalformedPackage(_))
        ));
    }
}
