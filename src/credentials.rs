use crate::error::AppError;
use crate::sigv4::{self, Credentials, SigningRequest};
use crate::target::{AuthMode, ProviderTarget};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Refresh this long before the STS expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;
/// Session length requested from STS.
const SESSION_DURATION_SECS: u32 = 3600;

#[derive(Debug, Clone)]
struct CachedCredentials {
    credentials: Credentials,
    expires_at: DateTime<Utc>,
}

impl CachedCredentials {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

/// Resolves AWS credentials for a request target.
///
/// Static credentials pass through untouched. Assumed-role credentials are
/// exchanged via STS AssumeRole and cached process-wide by role ARN; entries
/// are immutable once installed and refreshed lazily 60 s before expiry.
/// Concurrent refreshes for the same role coalesce behind a per-role mutex.
pub struct CredentialProvider {
    http_client: reqwest::Client,
    cache: DashMap<String, CachedCredentials>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CredentialProvider {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            cache: DashMap::new(),
            refresh_locks: DashMap::new(),
        }
    }

    /// Resolve credentials for the target, performing an STS exchange when
    /// the target uses assumed-role auth.
    pub async fn resolve(&self, target: &ProviderTarget) -> Result<Credentials, AppError> {
        match target.auth_mode {
            AuthMode::Static => Ok(Credentials {
                access_key_id: target.access_key_id.clone(),
                secret_access_key: target.secret_access_key.clone(),
                session_token: target.session_token.clone(),
            }),
            AuthMode::AssumedRole => self.resolve_assumed_role(target).await,
        }
    }

    async fn resolve_assumed_role(&self, target: &ProviderTarget) -> Result<Credentials, AppError> {
        let role_arn = target.require_role_arn()?.to_string();
        let now = Utc::now();

        if let Some(entry) = self.cache.get(&role_arn) {
            if entry.is_fresh(now) {
                return Ok(entry.credentials.clone());
            }
        }

        // Single-flight: one refresh per role, late arrivals reuse the result.
        let lock = self
            .refresh_locks
            .entry(role_arn.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(entry) = self.cache.get(&role_arn) {
            if entry.is_fresh(Utc::now()) {
                return Ok(entry.credentials.clone());
            }
        }

        tracing::debug!(role_arn = %role_arn, "Refreshing assumed-role credentials via STS");
        let refreshed = self.assume_role(target, &role_arn).await?;
        let credentials = refreshed.credentials.clone();
        self.cache.insert(role_arn, refreshed);
        Ok(credentials)
    }

    /// Drop a cached entry, e.g. after the provider rejected the session.
    pub fn invalidate(&self, role_arn: &str) {
        self.cache.remove(role_arn);
    }

    async fn assume_role(
        &self,
        target: &ProviderTarget,
        role_arn: &str,
    ) -> Result<CachedCredentials, AppError> {
        let endpoint = match &target.endpoint_url {
            Some(custom) => format!("{}/", custom),
            None => format!("https://sts.{}.amazonaws.com/", target.region),
        };
        let url = url::Url::parse(&endpoint)
            .map_err(|e| AppError::Internal(format!("invalid STS URL: {}", e)))?;

        let session_name = format!("bedrock-gateway-{}", uuid::Uuid::new_v4().simple());
        let body = format!(
            "Action=AssumeRole&Version=2011-06-15&RoleArn={}&RoleSessionName={}&DurationSeconds={}",
            urlencoding::encode(role_arn),
            session_name,
            SESSION_DURATION_SECS,
        );

        let base_creds = Credentials {
            access_key_id: target.access_key_id.clone(),
            secret_access_key: target.secret_access_key.clone(),
            session_token: target.session_token.clone(),
        };
        let extra_headers = vec![(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )];
        let signed = sigv4::sign(
            &SigningRequest {
                method: "POST",
                url: &url,
                headers: &extra_headers,
                body: body.as_bytes(),
                region: &target.region,
                service: "sts",
            },
            &base_creds,
            Utc::now(),
        )
        .map_err(|e| AppError::Credential(e.to_string()))?;

        let mut request = self.http_client.post(endpoint);
        for (key, value) in &signed {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request.body(body).send().await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            self.invalidate(role_arn);
            let message = crate::xml_utils::first_tag_text(&bytes, "Message")
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            return Err(AppError::Credential(format!(
                "STS AssumeRole failed ({}): {}",
                status, message
            )));
        }

        parse_assume_role_response(&bytes)
    }
}

fn parse_assume_role_response(body: &[u8]) -> Result<CachedCredentials, AppError> {
    let access_key_id = crate::xml_utils::first_tag_text(body, "AccessKeyId")
        .ok_or_else(|| AppError::Credential("STS response missing AccessKeyId".to_string()))?;
    let secret_access_key = crate::xml_utils::first_tag_text(body, "SecretAccessKey")
        .ok_or_else(|| AppError::Credential("STS response missing SecretAccessKey".to_string()))?;
    let session_token = crate::xml_utils::first_tag_text(body, "SessionToken")
        .ok_or_else(|| AppError::Credential("STS response missing SessionToken".to_string()))?;
    let expiration = crate::xml_utils::first_tag_text(body, "Expiration")
        .ok_or_else(|| AppError::Credential("STS response missing Expiration".to_string()))?;

    let expires_at = DateTime::parse_from_rfc3339(&expiration)
        .map_err(|e| AppError::Credential(format!("invalid STS expiration '{}': {}", expiration, e)))?
        .with_timezone(&Utc);

    Ok(CachedCredentials {
        credentials: Credentials {
            access_key_id,
            secret_access_key,
            session_token: Some(session_token),
        },
        expires_at,
    })
}
