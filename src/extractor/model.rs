#![forbid(unsafe_code)]

//! Typed view of the extractor's JSON info dictionary and the projections the
//! API exposes.
//!
//! Every field is optional: the extractor omits or nulls whatever the platform
//! does not report, and unknown numbers stay `None` (serialized as `null`)
//! instead of turning into sentinel strings.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Snapshot returned by every extractor call. Only a subset of the info
/// dictionary is read; unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionResult {
    pub title: Option<String>,
    pub ext: Option<String>,
    pub uploader: Option<String>,
    pub uploader_id: Option<String>,
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub description: Option<String>,
    pub upload_date: Option<String>,
    pub webpage_url: Option<String>,
    pub thumbnail: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub fps: Option<f64>,
    pub filesize: Option<u64>,
    /// Human readable description of the selected format, present when the
    /// extractor picked a best format.
    pub format: Option<String>,
    pub format_id: Option<String>,
    pub formats: Option<Vec<FormatInfo>>,
    #[serde(rename = "_filename")]
    pub planned_filename: Option<String>,
    pub requested_downloads: Option<Vec<RequestedDownload>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestedDownload {
    pub filepath: Option<String>,
}

/// One candidate format as listed by the extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormatInfo {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub fps: Option<f64>,
    pub filesize: Option<u64>,
    pub tbr: Option<f64>,
    pub vbr: Option<f64>,
    pub abr: Option<f64>,
    pub acodec: Option<String>,
    pub vcodec: Option<String>,
    pub format_note: Option<String>,
    pub quality: Option<f64>,
    pub url: Option<String>,
}

/// Payload of `POST /metadata`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetadataSummary {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub description: Option<String>,
    pub upload_date: Option<String>,
    pub webpage_url: String,
}

/// Payload of the `metadata` key of `GET /formats`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DetailedMetadata {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub uploader_id: Option<String>,
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub description: Option<String>,
    pub upload_date: Option<String>,
    pub webpage_url: String,
    pub thumbnail: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub fps: Option<f64>,
    pub filesize: Option<u64>,
    pub ext: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BestFormat {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub fps: Option<f64>,
    pub filesize: Option<u64>,
}

impl ExtractionResult {
    /// Name of the file the extractor says it wrote, reduced to its final
    /// path component. Post-processing may rename the planned file, so the
    /// moved file path wins over the planned one.
    pub fn reported_file_name(&self) -> Option<String> {
        let moved = self
            .requested_downloads
            .as_ref()
            .and_then(|downloads| downloads.iter().find_map(|d| d.filepath.clone()));
        moved
            .or_else(|| self.planned_filename.clone())
            .and_then(|path| {
                Path::new(&path)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
    }

    pub fn metadata_summary(&self, requested_url: &str) -> MetadataSummary {
        MetadataSummary {
            title: self.title.clone(),
            uploader: self.uploader.clone(),
            duration: self.duration,
            view_count: self.view_count,
            like_count: self.like_count,
            description: self.description.clone(),
            upload_date: self.upload_date.clone(),
            webpage_url: self.webpage_url_or(requested_url),
        }
    }

    pub fn detailed_metadata(&self, requested_url: &str) -> DetailedMetadata {
        DetailedMetadata {
            title: self.title.clone(),
            uploader: self.uploader.clone(),
            uploader_id: self.uploader_id.clone(),
            duration: self.duration,
            view_count: self.view_count,
            like_count: self.like_count,
            comment_count: self.comment_count,
            description: self.description.clone(),
            upload_date: self.upload_date.clone(),
            webpage_url: self.webpage_url_or(requested_url),
            thumbnail: self.thumbnail.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
            filesize: self.filesize,
            ext: self.ext.clone(),
        }
    }

    pub fn format_list(&self) -> Vec<FormatInfo> {
        self.formats.clone().unwrap_or_default()
    }

    pub fn best_format(&self) -> Option<BestFormat> {
        self.format.as_ref()?;
        Some(BestFormat {
            format_id: self.format_id.clone(),
            ext: self.ext.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
            filesize: self.filesize,
        })
    }

    fn webpage_url_or(&self, requested_url: &str) -> String {
        self.webpage_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| requested_url.to_string())
    }
}
