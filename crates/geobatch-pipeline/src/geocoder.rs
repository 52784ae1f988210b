//! Geocoder capability seam
//!
//! The engine is an external collaborator: given a normalized query (or a
//! coordinate pair) and optional filters it returns ranked candidates. The
//! shipped implementation speaks the engine's HTTP API; tests swap in
//! in-process stubs behind the same trait.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::record::Candidate;

/// Opaque geocoding capability.
#[async_trait]
pub trait Geocoder: std::fmt::Debug + Send + Sync {
    /// Forward geocode. Must tolerate empty or garbage query text by
    /// returning zero candidates rather than erroring.
    async fn search(
        &self,
        query: &str,
        bias_center: Option<(f64, f64)>,
        filters: &[(String, String)],
    ) -> anyhow::Result<Vec<Candidate>>;

    /// Reverse geocode a coordinate pair.
    async fn reverse(
        &self,
        lat: f64,
        lon: f64,
        filters: &[(String, String)],
    ) -> anyhow::Result<Vec<Candidate>>;

    /// Cheap reachability probe for the health endpoint. Defaults to
    /// optimistic for in-process implementations.
    async fn healthcheck(&self) -> bool {
        true
    }
}

/// Configuration for the HTTP-backed geocoder client.
#[derive(Debug, Clone)]
pub struct HttpGeocoderConfig {
    /// Engine base URL, e.g. `http://geocoder:7878`.
    pub base_url: String,
    pub timeout: Duration,
}

/// Client for the engine's HTTP API. Responses are GeoJSON feature
/// collections; only the fields the pipeline consumes are deserialized.
#[derive(Debug)]
pub struct HttpGeocoder {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: FeatureProperties,
    geometry: Option<FeatureGeometry>,
}

#[derive(Debug, Default, Deserialize)]
struct FeatureProperties {
    #[serde(default)]
    label: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    postcode: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    context: String,
}

#[derive(Debug, Deserialize)]
struct FeatureGeometry {
    #[serde(default)]
    coordinates: Vec<f64>,
}

impl HttpGeocoder {
    pub fn new(config: HttpGeocoderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_candidates(
        &self,
        path: &str,
        params: Vec<(String, String)>,
    ) -> anyhow::Result<Vec<Candidate>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?;

        let collection: FeatureCollection = response.json().await?;
        Ok(collection
            .features
            .into_iter()
            .map(|feature| {
                let (lon, lat) = match feature.geometry.as_ref().map(|g| g.coordinates.as_slice())
                {
                    Some([lon, lat, ..]) => (*lon, *lat),
                    _ => (0.0, 0.0),
                };
                Candidate {
                    label: feature.properties.label,
                    score: feature.properties.score,
                    lon,
                    lat,
                    postcode: feature.properties.postcode,
                    city: feature.properties.city,
                    context: feature.properties.context,
                }
            })
            .collect())
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn search(
        &self,
        query: &str,
        bias_center: Option<(f64, f64)>,
        filters: &[(String, String)],
    ) -> anyhow::Result<Vec<Candidate>> {
        let mut params = vec![("q".to_string(), query.to_string())];
        if let Some((lat, lon)) = bias_center {
            params.push(("lat".to_string(), lat.to_string()));
            params.push(("lon".to_string(), lon.to_string()));
        }
        params.extend(filters.iter().cloned());

        self.fetch_candidates("/search", params).await
    }

    async fn reverse(
        &self,
        lat: f64,
        lon: f64,
        filters: &[(String, String)],
    ) -> anyhow::Result<Vec<Candidate>> {
        let mut params = vec![
            ("lat".to_string(), lat.to_string()),
            ("lon".to_string(), lon.to_string()),
        ];
        params.extend(filters.iter().cloned());

        self.fetch_candidates("/reverse", params).await
    }

    async fn healthcheck(&self) -> bool {
        // Any HTTP answer counts as reachable; the engine has no dedicated
        // health route.
        match self.client.get(&self.base_url).send().await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(error = %err, "Geocoder healthcheck failed");
                false
            },
        }
    }
}
