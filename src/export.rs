//! Export Link Synthesizer
//!
//! Download links re-render the aggregation template in export form and point
//! it at the store's download endpoint, one URL per format.

use serde::Serialize;

use crate::error::EngineResult;
use crate::templates::{self, QueryParams, TemplateKind};

pub const EXPORT_FORMATS: [&str; 5] = ["csv", "geojson", "kml", "shp", "svg"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadUrls {
    pub csv: String,
    pub geojson: String,
    pub kml: String,
    pub shp: String,
    pub svg: String,
}

/// Build one link per export format. Output depends only on the inputs.
pub fn build_download_urls(endpoint: &str, kind: TemplateKind, params: &QueryParams) -> EngineResult<DownloadUrls> {
    let query = templates::to_export_form(kind, params)?;
    let encoded = urlencoding::encode(&query);
    let [csv, geojson, kml, shp, svg] =
        EXPORT_FORMATS.map(|format| format!("{}?q={}&format={}", endpoint, encoded, format));

    Ok(DownloadUrls { csv, geojson, kml, shp, svg })
}
