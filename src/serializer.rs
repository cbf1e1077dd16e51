//! JSON:API style envelopes for engine results

use serde::Serialize;

use crate::aggregator::{LatestDate, StatsResult};
use crate::export::DownloadUrls;

const LOSS_TYPE: &str = "guira-loss";
const LATEST_TYPE: &str = "guira-latest";

#[derive(Debug, Serialize)]
pub struct Document<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct Resource<A> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: Option<String>,
    pub attributes: A,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LossAttributes {
    pub value: f64,
    pub period: &'static str,
    pub min_date: Option<String>,
    pub max_date: Option<String>,
    pub area_hectares: f64,
    pub download_urls: DownloadUrls,
}

#[derive(Debug, Serialize)]
pub struct LatestAttributes {
    pub date: String,
}

pub fn serialize_loss(result: StatsResult) -> Document<Resource<LossAttributes>> {
    Document {
        data: Resource {
            kind: LOSS_TYPE,
            id: result.id,
            attributes: LossAttributes {
                value: result.value,
                period: result.period_label,
                min_date: result.min_date,
                max_date: result.max_date,
                area_hectares: result.area_ha,
                download_urls: result.download_urls,
            },
        },
    }
}

pub fn serialize_latest(dates: Vec<LatestDate>) -> Document<Vec<Resource<LatestAttributes>>> {
    Document {
        data: dates
            .into_iter()
            .map(|LatestDate { date }| Resource {
                kind: LATEST_TYPE,
                id: Some(date.clone()),
                attributes: LatestAttributes { date },
            })
            .collect(),
    }
}
