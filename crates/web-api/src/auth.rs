//! JWT 认证模块
//!
//! 提供 JWT token 生成、验证；用户标识取自 `sub` 声明

use application::{ApplicationError, TokenVerifier};
use axum::http::HeaderMap;
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            config,
            encoding_key,
            decoding_key,
            validation,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, user_id: &UserId) -> Result<String, ApiError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|err| {
            ApiError::internal_server_error(format!("Token generation failed: {}", err))
        })
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApplicationError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|token_data| token_data.claims)
            .map_err(|err| ApplicationError::authentication(format!("invalid token: {}", err)))
    }

    /// 从 headers 中提取和验证 token
    pub fn extract_user_from_headers(&self, headers: &HeaderMap) -> Result<UserId, ApiError> {
        let auth_header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

        Ok(self.verify(token)?)
    }
}

impl TokenVerifier for JwtService {
    fn verify(&self, token: &str) -> Result<UserId, ApplicationError> {
        let claims = self.verify_token(token)?;
        UserId::parse(claims.sub)
            .map_err(|_| ApplicationError::authentication("token subject is empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(secret: &str, expiration_hours: i64) -> JwtService {
        JwtService::new(JwtConfig {
            secret: secret.into(),
            expiration_hours,
        })
    }

    #[test]
    fn issued_token_round_trips_to_subject() {
        let jwt = service("test-secret", 1);
        let user = UserId::parse("42").unwrap();
        let token = jwt.generate_token(&user).unwrap();

        assert_eq!(jwt.verify(&token).unwrap(), user);
    }

    #[test]
    fn rejects_foreign_signature_and_expired_tokens() {
        let user = UserId::parse("42").unwrap();
        let forged = service("other-secret", 1).generate_token(&user).unwrap();
        assert!(matches!(
            service("test-secret", 1).verify(&forged),
            Err(ApplicationError::Authentication(_))
        ));

        let expired = service("test-secret", -2).generate_token(&user).unwrap();
        assert!(service("test-secret", 1).verify(&expired).is_err());

        assert!(service("test-secret", 1).verify("not-a-jwt").is_err());
    }

    #[test]
    fn extracts_bearer_header() {
        let jwt = service("test-secret", 1);
        let user = UserId::parse("7").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", jwt.generate_token(&user).unwrap())
                .parse()
                .unwrap(),
        );
        assert_eq!(jwt.extract_user_from_headers(&headers).unwrap(), user);

        assert!(jwt.extract_user_from_headers(&HeaderMap::new()).is_err());
    }
}
