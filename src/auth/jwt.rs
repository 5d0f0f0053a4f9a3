use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Claims of the access tokens issued by the upstream identity service.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Unauthenticated("Invalid token".to_string()))
    }
}

pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthenticated("Invalid or expired token".to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    use super::*;

    fn token(sub: &str, exp: i64, secret: &str) -> String {
        encode(
            &Header::default(),
            &Claims { sub: sub.to_string(), exp },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_round_trip() {
        let user_id = Uuid::new_v4();
        let exp = (Utc::now() + Duration::hours(1)).timestamp();
        let claims = verify_jwt(&token(&user_id.to_string(), exp, "s3cret"), "s3cret").unwrap();
        assert_eq!(claims.user_id().unwrap(), user_id);
    }

    #[test]
    fn test_rejects_wrong_secret_expired_and_bad_subject() {
        let exp = (Utc::now() + Duration::hours(1)).timestamp();
        let expired = (Utc::now() - Duration::hours(1)).timestamp();
        let sub = Uuid::new_v4().to_string();

        assert!(verify_jwt(&token(&sub, exp, "other"), "s3cret").is_err());
        assert!(verify_jwt(&token(&sub, expired, "s3cret"), "s3cret").is_err());

        let claims = verify_jwt(&token("not-a-uuid", exp, "s3cret"), "s3cret").unwrap();
        assert!(matches!(claims.user_id(), Err(AppError::Unauthenticated(_))));
    }
}
