use crate::error::{AppError, Result};
use crate::model::{FavoriteLocation, FavoriteUpdate, NewFavorite, Reading};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub nombre: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct Registration<'a> {
    nombre: &'a str,
    email: &'a str,
    password: &'a str,
}

/// Client for the gateway's `/api/v1` surface.
///
/// Holds the bearer token itself; nothing else in the process sees it.
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ecotrack/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = check_status(builder.send().await?).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Most recent batch for all stations and pollutants.
    pub async fn latest_readings(&self) -> Result<Vec<Reading>> {
        debug!("Fetching latest readings from {}", self.base_url);
        let batch: Vec<serde_json::Value> = self
            .send_json(self.request(Method::GET, "/data/latest"))
            .await?;
        let readings = readings_from_batch(batch, "latest readings");
        info!("Fetched {} latest readings", readings.len());
        Ok(readings)
    }

    pub async fn station_history(&self, station_id: &str) -> Result<Vec<Reading>> {
        if station_id.trim().is_empty() || station_id.contains('/') {
            return Err(AppError::MalformedInput(format!(
                "Invalid station id '{}'",
                station_id
            )));
        }

        let path = format!("/data/history/{}", station_id.trim());
        let batch: Vec<serde_json::Value> =
            self.send_json(self.request(Method::GET, &path)).await?;
        let readings = readings_from_batch(batch, &format!("station {} history", station_id));
        debug!("Fetched {} historical readings for station {}", readings.len(), station_id);
        Ok(readings)
    }

    /// Log in and keep the returned token for later calls.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<()> {
        let builder = self
            .client
            .post(format!("{}/users/login", self.base_url))
            .json(&Credentials { email, password });

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(auth_rejected(response).await);
        }

        let login: LoginResponse = serde_json::from_slice(&response.bytes().await?)?;
        self.set_token(login.token);
        info!("Logged in as {}", email);
        Ok(())
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/users/register", self.base_url))
            .json(&Registration {
                nombre: name,
                email,
                password,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(auth_rejected(response).await);
        }

        info!("Registered user {}", email);
        Ok(())
    }

    pub async fn profile(&self) -> Result<Profile> {
        self.send_json(self.request(Method::GET, "/users/profile"))
            .await
    }

    pub async fn list_favorites(&self) -> Result<Vec<FavoriteLocation>> {
        self.send_json(self.request(Method::GET, "/favorites")).await
    }

    /// Validates coordinates locally before anything is sent.
    pub async fn create_favorite(&self, favorite: &NewFavorite) -> Result<FavoriteLocation> {
        favorite.validate()?;

        let value: serde_json::Value = self
            .send_json(self.request(Method::POST, "/favorites").json(favorite))
            .await?;

        // The users service may answer with the full record or only the new id
        if let Ok(created) = serde_json::from_value::<FavoriteLocation>(value.clone()) {
            return Ok(created);
        }

        let id = value
            .get("id_ubicacion")
            .or_else(|| value.get("id"))
            .and_then(|v| v.as_i64())
            .ok_or_else(|| AppError::Api {
                status: 200,
                message: format!("Favorite created without an id: {}", value),
            })?;

        Ok(FavoriteLocation {
            id,
            owner_user_id: None,
            label: favorite.label.clone(),
            latitude: favorite.latitude.unwrap_or_default(),
            longitude: favorite.longitude.unwrap_or_default(),
            threshold_pm25: Some(favorite.threshold_pm25),
            threshold_no2: Some(favorite.threshold_no2),
        })
    }

    pub async fn update_favorite(&self, id: i64, update: &FavoriteUpdate) -> Result<()> {
        let path = format!("/favorites/{}", id);
        let response = self.request(Method::PUT, &path).json(update).send().await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn delete_favorite(&self, id: i64) -> Result<()> {
        let path = format!("/favorites/{}", id);
        let response = self.request(Method::DELETE, &path).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

/// Parse each record on its own so one bad document does not sink the batch.
fn readings_from_batch(batch: Vec<serde_json::Value>, source: &str) -> Vec<Reading> {
    let total = batch.len();
    let readings: Vec<Reading> = batch
        .into_iter()
        .enumerate()
        .filter_map(|(i, record)| match serde_json::from_value::<Reading>(record) {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!("Skipping malformed record {} in {}: {}", i, source, e);
                None
            }
        })
        .collect();

    let skipped = total - readings.len();
    if skipped > 0 {
        warn!("Skipped {} of {} records in {}", skipped, total, source);
    }
    readings
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = error_message(response).await;
    warn!("Request failed with {}: {}", status, message);
    Err(AppError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn auth_rejected(response: Response) -> AppError {
    let status = response.status().as_u16();
    AppError::AuthRejected {
        status,
        message: error_message(response).await,
    }
}

/// Backend error bodies are `{"message": ...}`; anything else is passed through as text.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            if text.is_empty() {
                status.to_string()
            } else {
                text
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_malformed_records_are_skipped() {
        let batch = vec![
            json!({"Estación_ID": 1, "Tipo_Contaminante": "PM2.5", "Valor": 62.0,
                   "Timestamp": "2024-01-15T10:00:00"}),
            json!({"Estación_ID": 2, "Tipo_Contaminante": "PM2.5", "Valor": null,
                   "Timestamp": "2024-01-15T10:00:00"}),
            json!({"Estación_ID": 3, "Tipo_Contaminante": "NO2", "Valor": 4.0,
                   "Timestamp": "not a time"}),
            json!("garbage"),
        ];

        let readings = readings_from_batch(batch, "test batch");
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].station_id, "1");
        assert_eq!(readings[0].value, 62.0);
    }

    #[test]
    fn test_empty_batch() {
        assert!(readings_from_batch(Vec::new(), "test batch").is_empty());
    }
}
