use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use ziarah_db::DbPool;
use ziarah_models::location::LocationSample;

use crate::error::CoreError;
use crate::presence::PresenceStore;

#[derive(Clone)]
pub struct TrackingService {
    db: DbPool,
    presence: Arc<dyn PresenceStore>,
    ttl: Duration,
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), CoreError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(CoreError::BadRequest(format!("latitude out of range: {latitude}")));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(CoreError::BadRequest(format!("longitude out of range: {longitude}")));
    }
    Ok(())
}

impl TrackingService {
    pub fn new(db: DbPool, presence: Arc<dyn PresenceStore>, ttl: Duration) -> Self {
        Self { db, presence, ttl }
    }

    pub async fn update_location(
        &self,
        group_id: Uuid,
        account_id: Uuid,
        latitude: f64,
        longitude: f64,
        timestamp_ms: i64,
    ) -> Result<LocationSample, CoreError> {
        validate_coordinates(latitude, longitude)?;
        let sample = LocationSample {
            user_id: account_id,
            full_name: None,
            role: None,
            latitude,
            longitude,
            timestamp: timestamp_ms,
        };
        self.presence.put(group_id, &sample, self.ttl).await?;
        Ok(sample)
    }

    /// Current samples of the group, enriched with directory names. When the
    /// directory is unreachable the coordinates are returned without names.
    pub async fn group_locations(&self, group_id: Uuid) -> Result<Vec<LocationSample>, CoreError> {
        let mut samples = self.presence.get_all(group_id).await?;
        if samples.is_empty() {
            return Ok(samples);
        }

        let ids: Vec<Uuid> = samples.iter().map(|s| s.user_id).collect();
        match ziarah_db::users::find_by_ids(&self.db, &ids).await {
            Ok(accounts) => {
                let directory: HashMap<Uuid, _> =
                    accounts.into_iter().map(|a| (a.id, a)).collect();
                for sample in &mut samples {
                    if let Some(account) = directory.get(&sample.user_id) {
                        sample.full_name = Some(account.full_name.clone());
                        sample.role = Some(account.role.clone());
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%group_id, error = %err, "directory lookup failed, returning bare locations");
            }
        }
        samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(samples)
    }
}
