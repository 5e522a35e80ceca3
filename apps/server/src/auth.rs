use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of initData before it's considered expired (24 hours).
const MAX_AUTH_AGE_SECS: i64 = 86400;

/// The `user` object embedded in Mini App initData.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

/// Validates Telegram Mini App initData and extracts user info.
/// See: https://core.telegram.org/bots/webapps#validating-data-received-via-the-mini-app
pub fn validate_init_data(init_data: &str, bot_token: &str) -> Option<TelegramUser> {
    validate_init_data_at(init_data, bot_token, chrono::Utc::now().timestamp())
}

fn validate_init_data_at(init_data: &str, bot_token: &str, now: i64) -> Option<TelegramUser> {
    let params: BTreeMap<String, String> = url::form_urlencoded::parse(init_data.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let hash = params.get("hash")?;

    // Verify auth_date is recent (prevent replay attacks)
    if let Some(auth_date) = params.get("auth_date").and_then(|s| s.parse::<i64>().ok()) {
        if (now - auth_date) > MAX_AUTH_AGE_SECS {
            tracing::warn!(
                "initData expired: auth_date={}, age={}s",
                auth_date,
                now - auth_date
            );
            return None;
        }
    }

    let computed_hash = sign(&params, bot_token)?;
    if computed_hash != *hash {
        tracing::warn!("initData hash mismatch");
        return None;
    }

    let user_json = params.get("user")?;
    serde_json::from_str::<TelegramUser>(user_json).ok()
}

/// hex(HMAC-SHA256(HMAC-SHA256("WebAppData", bot_token), data_check_string))
fn sign(params: &BTreeMap<String, String>, bot_token: &str) -> Option<String> {
    // Sorted key=value pairs, excluding hash
    let data_check_string: String = params
        .iter()
        .filter(|(k, _)| k.as_str() != "hash")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");

    let mut secret_mac = HmacSha256::new_from_slice(b"WebAppData").ok()?;
    secret_mac.update(bot_token.as_bytes());
    let secret_key = secret_mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(&secret_key).ok()?;
    mac.update(data_check_string.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Extract Telegram user from the Authorization header.
/// Header format: `tma <initData>`
pub fn extract_user_from_header(auth_header: &str, bot_token: &str) -> Option<TelegramUser> {
    let init_data = auth_header.strip_prefix("tma ")?;
    validate_init_data(init_data, bot_token)
}

/// Admins are configured by Telegram id.
pub fn is_admin(user: &TelegramUser, admin_tg_ids: &[i64]) -> bool {
    admin_tg_ids.contains(&user.id)
}

/// Builds a signed initData string, as Telegram would hand it to the Mini App.
#[cfg(test)]
pub(crate) fn signed_init_data(user: &TelegramUser, bot_token: &str, auth_date: i64) -> String {
    let mut params = BTreeMap::new();
    params.insert("auth_date".to_string(), auth_date.to_string());
    params.insert(
        "user".to_string(),
        serde_json::to_string(user).unwrap(),
    );
    let hash = sign(&params, bot_token).unwrap();
    params.insert("hash".to_string(), hash);
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

// ── Tests ──
