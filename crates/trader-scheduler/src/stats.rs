//! 배치 실행 통계.

use std::time::Duration;

use serde::Serialize;

/// 작업 배치 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    /// 처리 대상 수
    pub total: usize,
    /// 주문/반영 성공
    pub success: usize,
    /// 에러
    pub errors: usize,
    /// 건너뜀 (조건 불충족, 쿨다운, 이미 매수함 등)
    pub skipped: usize,
    /// 제출된 주문 수
    pub orders_placed: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 다른 통계를 합산 (계좌 그룹별 결과 병합).
    pub fn merge(&mut self, other: &BatchStats) {
        self.total += other.total;
        self.success += other.success;
        self.errors += other.errors;
        self.skipped += other.skipped;
        self.orders_placed += other.orders_placed;
    }

    /// 성공률 계산 (%)
    ///
    /// skipped는 분모에서 제외.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.total.saturating_sub(self.skipped);
        if attempted == 0 {
            0.0
        } else {
            (self.success as f64 / attempted as f64) * 100.0
        }
    }

    /// 실행 로그 details 용 JSON.
    pub fn to_details(&self) -> serde_json::Value {
        serde_json::json!({
            "total": self.total,
            "success": self.success,
            "errors": self.errors,
            "skipped": self.skipped,
            "orders_placed": self.orders_placed,
            "elapsed_ms": self.elapsed.as_millis() as u64,
        })
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            total = self.total,
            success = self.success,
            errors = self.errors,
            skipped = self.skipped,
            orders_placed = self.orders_placed,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "작업 완료"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_excluded_from_rate() {
        let stats = BatchStats {
            total: 10,
            success: 4,
            skipped: 5,
            errors: 1,
            ..Default::default()
        };
        assert!((stats.success_rate() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn details_carry_counts_and_elapsed() {
        let stats = BatchStats {
            total: 3,
            success: 2,
            orders_placed: 4,
            elapsed: Duration::from_millis(1500),
            ..Default::default()
        };
        let details = stats.to_details();
        assert_eq!(details["success"], 2);
        assert_eq!(details["orders_placed"], 4);
        assert_eq!(details["elapsed_ms"], 1500);
    }
}
