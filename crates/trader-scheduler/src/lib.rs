//! 해외주식 자동매매 스케줄러.
//!
//! 한국투자증권(KIS) 해외주식 계좌에 대해 전략별 매수/매도 주문을 정해진 시각에
//! 제출하고, 장중/장 마감 후 증권사 체결 내역과 주문 기록을 대사합니다.
//!
//! ```text
//! trader-scheduler
//! ├── config      // 환경변수 설정 (자동매매, 증권사 API, cron)
//! ├── cron        // KST cron 트리거 등록, 거래일 조건 확인
//! ├── engine      // 계좌별 세션, 포지션 순차 처리, 배치 통계
//! ├── jobs        // 기본/LOC/VR 매수, 익절, 진단, 로그 정리
//! ├── reconcile   // 체결 대사 (체결 반영, 만료 처리, 낙관적 반영 복원)
//! ├── store       // 포지션/주문/인증 정보/실행 로그 저장소
//! ├── exec_log    // 실행 로그 기록
//! ├── cooldown    // 사용자별 토큰 발급 쿨다운
//! ├── token_hook  // 재발급 토큰 저장
//! ├── notifier    // 알림 (tracing / 웹훅)
//! ├── stats       // 배치 통계
//! └── error       // 에러 분류
//! ```

pub mod config;
pub mod cooldown;
pub mod cron;
pub mod engine;
pub mod error;
pub mod exec_log;
pub mod jobs;
pub mod notifier;
pub mod reconcile;
pub mod stats;
pub mod store;
pub mod token_hook;

pub use config::SchedulerConfig;
pub use engine::{Engine, Outcome, PositionJob};
pub use error::{Result, SchedulerError, StoreError};
pub use jobs::JobKind;
pub use notifier::{Notification, Notifier, TracingNotifier, WebhookNotifier};
pub use reconcile::ReconcileMode;
pub use stats::BatchStats;
pub use store::{
    CredentialStore, ExecutionLogSink, LogQuery, MemoryStore, OrderFilter, PgStore,
    PositionFilter, PositionStore,
};
pub use token_hook::StoreTokenHook;
