/// Token management for Angel One SmartAPI
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub jwt_token: String,
    pub feed_token: String,
    pub jwt_expiry: DateTime<Utc>,
    pub feed_expiry: DateTime<Utc>,
    pub refresh_token: Option<String>,
}

impl Tokens {
    pub fn is_jwt_expired(&self) -> bool {
        Utc::now() >= self.jwt_expiry
    }
    
    pub fn is_feed_expired(&self) -> bool {
        Utc::now() >= self.feed_expiry
    }
    
    pub fn minutes_until_jwt_expiry(&self) -> i64 {
        (self.jwt_expiry - Utc::now()).num_minutes()
    }
    
    pub fn minutes_until_feed_expiry(&self) -> i64 {
        (self.feed_expiry - Utc::now()).num_minutes()
    }
}

/// Token manager with thread-safe access
pub struct TokenManager {
    tokens: Arc<RwLock<Option<Tokens>>>,
    token_file_path: String,
}

impl TokenManager {
    pub fn new(token_file_path: String) -> Self {
        TokenManager {
            tokens: Arc::new(RwLock::new(None)),
            token_file_path,
        }
    }
    
    /// Get current tokens (clone)
    pub async fn get_tokens(&self) -> Option<Tokens> {
        let tokens = self.tokens.read().await;
        tokens.clone()
    }
    
    /// Set tokens and persist to disk
    pub async fn set_tokens(&self, tokens: Tokens) -> Result<()> {
        // Persist to file
        self.save_tokens_to_file(&tokens).await?;
        
        // Update in memory
        let mut t = self.tokens.write().await;
        *t = Some(tokens);
        
        debug!("Tokens updated and persisted");
        Ok(())
    }
    
    /// Load tokens from file
    pub async fn load_from_file(&self) -> Result<()> {
        let content = tokio::fs::read_to_string(&self.token_file_path).await?;
        let tokens: Tokens = serde_json::from_str(&content)?;
        
        let mut t = self.tokens.write().await;
        *t = Some(tokens);
        
        debug!("Tokens loaded from file");
        Ok(())
    }
    
    /// Save tokens to file
    async fn save_tokens_to_file(&self, tokens: &Tokens) -> Result<()> {
        let json = serde_json::to_string_pretty(tokens)?;
        tokio::fs::write(&self.token_file_path, json).await?;
        Ok(())
    }
    
    /// Check if tokens need refresh (warning threshold)
    pub async fn needs_refresh(&self, warning_minutes: i64) -> bool {
        if let Some(tokens) = self.get_tokens().await {
            tokens.minutes_until_jwt_expiry() < warning_minutes
                || tokens.minutes_until_feed_expiry() < warning_minutes
        } else {
            true
        }
    }
    
    /// Check if tokens are valid
    pub async fn is_valid(&self) -> bool {
        if let Some(tokens) = self.get_tokens().await {
            !tokens.is_jwt_expired() && !tokens.is_feed_expired()
        } else {
            false
        }
    }
    
    /// Clear tokens
    pub async fn clear(&self) {
        let mut t = self.tokens.write().await;
        *t = None;
        
        // Delete file
        let _ = tokio::fs::remove_file(&self.token_file_path).await;
        
        warn!("Tokens cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tokens_expiring_in(minutes: i64) -> Tokens {
        Tokens {
            jwt_token: "jwt".to_string(),
            feed_token: "feed".to_string(),
            jwt_expiry: Utc::now() + Duration::minutes(minutes),
            feed_expiry: Utc::now() + Duration::minutes(minutes),
            refresh_token: None,
        }
    }

    #[test]
    fn tokens_expired_in_the_past_report_expired() {
        let tokens = tokens_expiring_in(-5);
        assert!(tokens.is_jwt_expired());
        assert!(tokens.is_feed_expired());
    }

    #[test]
    fn tokens_expiring_in_future_report_not_expired() {
        let tokens = tokens_expiring_in(30);
        assert!(!tokens.is_jwt_expired());
        assert!(!tokens.is_feed_expired());
    }

    #[tokio::test]
    async fn manager_with_no_tokens_is_invalid() {
        let manager = TokenManager::new(std::env::temp_dir().join(format!("tok-{}.json", uuid::Uuid::new_v4())).to_string_lossy().to_string());
        assert!(!manager.is_valid().await);
        assert!(manager.needs_refresh(5).await);
    }

    #[tokio::test]
    async fn manager_reports_valid_after_setting_fresh_tokens() {
        let path = std::env::temp_dir().join(format!("tok-{}.json", uuid::Uuid::new_v4()));
        let manager = TokenManager::new(path.to_string_lossy().to_string());

        manager.set_tokens(tokens_expiring_in(60)).await.unwrap();
        assert!(manager.is_valid().await);
        assert!(!manager.needs_refresh(5).await);

        let _ = std::fs::remove_file(&path);
    }
}

