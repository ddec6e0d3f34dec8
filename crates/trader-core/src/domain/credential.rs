//! 증권사 API 인증 정보.
//!
//! 외부 인증 정보 저장소가 복호화해서 넘겨주는 값이며,
//! 이 크레이트는 읽기만 하고 평문을 저장하지 않습니다.
//! 갱신된 액세스 토큰만 저장소 콜백을 통해 되돌려 씁니다.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use uuid::Uuid;

/// 계좌번호 앞자리(종합계좌번호) 길이
const ACCOUNT_PREFIX_LEN: usize = 8;

/// 인증 정보.
#[derive(Debug, Clone)]
pub struct Credential {
    /// 소유 사용자
    pub user_id: Uuid,
    pub app_key: String,
    pub app_secret: SecretString,
    /// 계좌번호 (예: "12345678-01" 또는 "1234567801")
    pub account_no: String,
    /// 모의투자 여부
    pub is_paper: bool,
    pub access_token: Option<SecretString>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// 새 인증 정보 생성 (토큰 없음).
    pub fn new(
        user_id: Uuid,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        account_no: impl Into<String>,
        is_paper: bool,
    ) -> Self {
        Self {
            user_id,
            app_key: app_key.into(),
            app_secret: SecretString::from(app_secret.into()),
            account_no: account_no.into(),
            is_paper,
            access_token: None,
            token_expires_at: None,
        }
    }

    /// 저장된 토큰 지정.
    pub fn with_token(mut self, token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        self.access_token = Some(SecretString::from(token.into()));
        self.token_expires_at = Some(expires_at);
        self
    }

    fn account_digits(&self) -> String {
        self.account_no.chars().filter(char::is_ascii_digit).collect()
    }

    /// 계좌번호 앞 8자리 (CANO).
    pub fn account_prefix(&self) -> String {
        self.account_digits()
            .chars()
            .take(ACCOUNT_PREFIX_LEN)
            .collect()
    }

    /// 계좌번호 뒤 2자리 (ACNT_PRDT_CD). 없으면 "01".
    pub fn account_suffix(&self) -> String {
        let digits = self.account_digits();
        if digits.len() > ACCOUNT_PREFIX_LEN {
            digits[ACCOUNT_PREFIX_LEN..].chars().take(2).collect()
        } else {
            "01".to_string()
        }
    }

    /// 레이트 리미터/쿨다운 키로 쓰는 인증 정보 식별자.
    ///
    /// 같은 앱키라도 모의/실전은 별도 한도를 가집니다.
    pub fn identity(&self) -> String {
        let env = if self.is_paper { "paper" } else { "live" };
        format!("{}:{}", env, self.app_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_account_number() {
        let cred = Credential::new(Uuid::new_v4(), "key", "secret", "12345678-01", false);
        assert_eq!(cred.account_prefix(), "12345678");
        assert_eq!(cred.account_suffix(), "01");

        let cred = Credential::new(Uuid::new_v4(), "key", "secret", "8765432122", true);
        assert_eq!(cred.account_prefix(), "87654321");
        assert_eq!(cred.account_suffix(), "22");
        assert_eq!(cred.identity(), "paper:key");
    }

    #[test]
    fn debug_masks_secret() {
        let cred = Credential::new(Uuid::new_v4(), "key", "top-secret", "12345678", false);
        assert!(!format!("{:?}", cred).contains("top-secret"));
    }
}
