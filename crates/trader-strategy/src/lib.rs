//! 자동매매 전략 엔진.
//!
//! 모든 전략은 I/O 없는 순수 계산입니다. 현재 포지션 상태와 시세를 받아
//! 주문 의도([`OrderIntent`])를 만들고, 주문 접수/체결 후의 포지션 변화를 적용합니다.
//! 실제 주문 제출과 저장은 스케줄러가 담당합니다.
//!
//! ```text
//! trader-strategy
//! ├── basic           // 조건부 일일 매수 + 익절 전량 매도
//! ├── loc_split       // 40분할 LOC 적립 (T값, 전반전/후반전, 분할 매도)
//! ├── value_rebalance // 밸류 리밸런싱 (밴드, 매수/매도 사다리, 체결 동기화)
//! ├── grid            // 그리드 레벨 생성 및 쌍 활성화
//! ├── fills           // 체결/가정 취소 시 포지션 반영
//! └── intent          // 주문 의도
//! ```

pub mod basic;
mod error;
pub mod fills;
pub mod grid;
mod intent;
pub mod loc_split;
pub mod value_rebalance;

pub use error::StrategyError;
pub use intent::OrderIntent;
