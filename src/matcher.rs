// =============================================================================
// StrategyMatcher — subscription lookup against the external directory
// =============================================================================
//
// The directory service owns users and their strategy documents; this engine
// only ever reads a snapshot.  For a fired signal the matcher pulls every
// user subscribed to the signal's indicator id, then filters to the
// strategies whose asset and timeframe match the signal's key.  The query is
// neither cheap nor side-effect-free for the directory, so it runs once per
// fire on the dispatcher task, never on the ingestion path.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::market_data::CandleKey;

// ---------------------------------------------------------------------------
// Directory wire types
// ---------------------------------------------------------------------------

/// One user document from `GET /api/v1/user`.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryUser {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "walletAddress", default)]
    pub wallet_address: String,
}

#[derive(Debug, Deserialize)]
struct UsersEnvelope {
    data: Vec<DirectoryUser>,
}

/// One strategy document from `GET /api/strategies/user/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribedStrategy {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "cryptoAsset")]
    pub crypto_asset: String,
    pub timeframe: String,
    #[serde(default)]
    pub indicators: Vec<String>,
}

/// A user together with their strategies that reference one indicator id.
#[derive(Debug, Clone)]
pub struct UserSubscriptions {
    pub user_id: String,
    pub strategies: Vec<SubscribedStrategy>,
}

/// One (user, strategy) pair an execution request must be published for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTarget {
    pub user_id: String,
    pub strategy_id: String,
}

// ---------------------------------------------------------------------------
// Directory client
// ---------------------------------------------------------------------------

/// HTTP client for the user/strategy directory service.
pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl DirectoryClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    async fn fetch_users(&self) -> Result<Vec<DirectoryUser>> {
        let url = format!("{}/api/v1/user", self.base_url);
        let envelope: UsersEnvelope = self
            .http
            .get(&url)
            .send()
            .await
            .context("directory user request failed")?
            .error_for_status()
            .context("directory user request rejected")?
            .json()
            .await
            .context("directory user response malformed")?;
        Ok(envelope.data)
    }

    async fn fetch_user_strategies(&self, user_id: &str) -> Result<Vec<SubscribedStrategy>> {
        let url = format!("{}/api/strategies/user/{}", self.base_url, user_id);
        self.http
            .get(&url)
            .send()
            .await
            .context("directory strategy request failed")?
            .error_for_status()
            .context("directory strategy request rejected")?
            .json()
            .await
            .context("directory strategy response malformed")
    }

    /// Fetch every user whose strategies include `indicator_id`, with those
    /// strategies attached.
    ///
    /// A failure for one user skips that user and continues — one broken
    /// document must not hide every other subscriber.
    pub async fn subscriptions_for_indicator(
        &self,
        indicator_id: &str,
    ) -> Result<Vec<UserSubscriptions>> {
        let users = self.fetch_users().await?;
        let mut result = Vec::new();

        for user in users {
            let strategies = match self.fetch_user_strategies(&user.id).await {
                Ok(list) => list,
                Err(e) => {
                    warn!(user = %user.id, error = %e, "strategy fetch failed; user skipped");
                    continue;
                }
            };

            let subscribed: Vec<SubscribedStrategy> = strategies
                .into_iter()
                .filter(|s| s.indicators.iter().any(|id| id == indicator_id))
                .collect();

            if !subscribed.is_empty() {
                result.push(UserSubscriptions {
                    user_id: user.id,
                    strategies: subscribed,
                });
            }
        }

        debug!(
            indicator = indicator_id,
            users = result.len(),
            "directory snapshot fetched"
        );
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Filter a subscription snapshot down to the (user, strategy) pairs that
/// match a fired signal's key and indicator id.
pub fn match_subscriptions(
    users: &[UserSubscriptions],
    key: &CandleKey,
    indicator_id: &str,
) -> Vec<ExecutionTarget> {
    let mut targets = Vec::new();

    for user in users {
        for strategy in &user.strategies {
            let subscribed = strategy.indicators.iter().any(|id| id == indicator_id);
            if strategy.crypto_asset == key.symbol
                && strategy.timeframe == key.interval
                && subscribed
            {
                targets.push(ExecutionTarget {
                    user_id: user.user_id.clone(),
                    strategy_id: strategy.id.clone(),
                });
            }
        }
    }

    targets
}
