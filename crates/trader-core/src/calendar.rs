//! 미국 증시 거래일 캘린더.
//!
//! 휴장일은 연도별 규칙(고정 날짜, N번째 요일, 부활절 기준 성금요일)으로 계산하고,
//! 주말에 걸리면 가장 가까운 평일로 이동합니다 (토 → 금, 일 → 월).
//!
//! 조기폐장일(ET 13:00 마감):
//! - 7월 3일 (평일인 경우)
//! - 추수감사절(11월 넷째 목요일) 다음 날
//! - 12월 24일 (평일인 경우)
//!
//! 스케줄러 트리거는 KST 기준이지만 거래일 판단은 항상 ET 날짜로 합니다.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Offset, TimeZone, Utc, Weekday};
use chrono_tz::{America::New_York, Asia::Seoul};
use serde::{Deserialize, Serialize};

/// 정규장 시작 (ET)
const REGULAR_OPEN: (u32, u32) = (9, 30);
/// 정규장 마감 (ET)
const REGULAR_CLOSE: (u32, u32) = (16, 0);
/// 조기폐장 마감 (ET)
const EARLY_CLOSE: (u32, u32) = (13, 0);
/// 다음 거래일 탐색 한도 (일)
const MAX_SCAN_DAYS: i64 = 10;

/// 휴장일로 건너뛴 사유.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// 주말
    Weekend,
    /// 공휴일
    Holiday,
    /// 조기폐장 (당일 마감 시각 이미 경과)
    EarlyClose,
}

/// 건너뛴 날짜 항목.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDay {
    pub date: NaiveDate,
    pub reason: SkipReason,
    /// 공휴일 이름 (공휴일인 경우)
    pub label: Option<String>,
}

/// 다음 정산(장 마감) 시각 정보.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementInfo {
    /// 정산 대상 거래일 (ET 날짜)
    pub target_date: NaiveDate,
    /// 요일 약칭 (예: "Fri")
    pub day_name: String,
    /// 오늘 정산 여부
    pub is_today: bool,
    /// 오늘(ET)부터 남은 일수
    pub days_until: i64,
    /// 대상일이 조기폐장일인지
    pub is_early_close: bool,
    /// 정산 시각 (UTC)
    pub execution_at: DateTime<Utc>,
    /// ET 표기 (예: "2024-11-29 13:00 ET")
    pub execution_time_et: String,
    /// KST 표기 (예: "2024-11-30 03:00 KST")
    pub execution_time_kst: String,
    /// KST - ET 시차 (서머타임 13시간, 그 외 14시간)
    pub kst_offset_hours: i64,
    /// 건너뛴 날짜 목록
    pub skipped_days: Vec<SkippedDay>,
}

/// 미국 증시 캘린더.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketCalendar;

impl MarketCalendar {
    /// 주말 여부.
    pub fn is_weekend(date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// 해당 연도의 휴장일 목록 (주말 보정 후).
    pub fn holidays(year: i32) -> Vec<(NaiveDate, &'static str)> {
        let mut list = Vec::with_capacity(10);

        let mut push = |date: Option<NaiveDate>, name: &'static str| {
            if let Some(date) = date {
                list.push((observed(date), name));
            }
        };

        push(NaiveDate::from_ymd_opt(year, 1, 1), "New Year's Day");
        push(nth_weekday(year, 1, Weekday::Mon, 3), "Martin Luther King Jr. Day");
        push(nth_weekday(year, 2, Weekday::Mon, 3), "Presidents' Day");
        push(easter_sunday(year).map(|d| d - Duration::days(2)), "Good Friday");
        push(last_weekday(year, 5, Weekday::Mon), "Memorial Day");
        push(NaiveDate::from_ymd_opt(year, 6, 19), "Juneteenth");
        push(NaiveDate::from_ymd_opt(year, 7, 4), "Independence Day");
        push(nth_weekday(year, 9, Weekday::Mon, 1), "Labor Day");
        push(thanksgiving(year), "Thanksgiving Day");
        push(NaiveDate::from_ymd_opt(year, 12, 25), "Christmas Day");

        list
    }

    /// 휴장일이면 휴장일 이름 반환.
    ///
    /// 다음 해 1월 1일이 토요일이면 12월 31일로 당겨지므로 다음 연도도 확인합니다.
    pub fn holiday_name(date: NaiveDate) -> Option<&'static str> {
        [date.year(), date.year() + 1]
            .into_iter()
            .flat_map(Self::holidays)
            .find(|(d, _)| *d == date)
            .map(|(_, name)| name)
    }

    /// 휴장일 여부.
    pub fn is_holiday(date: NaiveDate) -> bool {
        Self::holiday_name(date).is_some()
    }

    /// 거래일 여부 (평일이면서 휴장일이 아님).
    pub fn is_open(date: NaiveDate) -> bool {
        !Self::is_weekend(date) && !Self::is_holiday(date)
    }

    /// 조기폐장일 여부.
    pub fn is_early_close(date: NaiveDate) -> bool {
        if !Self::is_open(date) {
            return false;
        }
        let (month, day) = (date.month(), date.day());
        (month == 7 && day == 3)
            || (month == 12 && day == 24)
            || thanksgiving(date.year()).map(|t| t + Duration::days(1)) == Some(date)
    }

    /// 해당 거래일의 마감 시각 (ET).
    pub fn close_time_et(date: NaiveDate) -> NaiveTime {
        let (h, m) = if Self::is_early_close(date) {
            EARLY_CLOSE
        } else {
            REGULAR_CLOSE
        };
        NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
    }

    /// 현재 시각의 미국 거래일 날짜 (ET).
    pub fn us_trading_date(now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&New_York).date_naive()
    }

    /// 정규장 시간 중인지 확인.
    pub fn is_market_hours(now: DateTime<Utc>) -> bool {
        let et = now.with_timezone(&New_York);
        let date = et.date_naive();
        if !Self::is_open(date) {
            return false;
        }
        let open = NaiveTime::from_hms_opt(REGULAR_OPEN.0, REGULAR_OPEN.1, 0)
            .unwrap_or(NaiveTime::MIN);
        et.time() >= open && et.time() < Self::close_time_et(date)
    }

    /// 해당 날짜의 KST - ET 시차 (서머타임 13, 그 외 14).
    pub fn kst_offset_hours(date: NaiveDate) -> i64 {
        let noon = date.and_hms_opt(12, 0, 0).unwrap_or_default();
        let et_offset_secs = New_York
            .from_local_datetime(&noon)
            .earliest()
            .map(|dt| dt.offset().fix().local_minus_utc())
            .unwrap_or(-5 * 3600);
        // KST는 UTC+9 고정
        9 - i64::from(et_offset_secs) / 3600
    }

    /// 다음 거래일 (최대 10일 탐색).
    pub fn next_trading_day(date: NaiveDate) -> Option<NaiveDate> {
        (1..=MAX_SCAN_DAYS)
            .map(|offset| date + Duration::days(offset))
            .find(|d| Self::is_open(*d))
    }

    /// 현재 시각 기준 다음 정산 시각 계산.
    ///
    /// 오늘이 거래일이고 마감 전이면 오늘, 아니면 다음 거래일이 대상입니다.
    pub fn next_settlement_time(now: DateTime<Utc>) -> Option<SettlementInfo> {
        let et_now = now.with_timezone(&New_York);
        let today = et_now.date_naive();
        let mut skipped = Vec::new();

        if Self::is_open(today) {
            if et_now.time() < Self::close_time_et(today) {
                return Self::build_settlement(today, 0, skipped);
            }
            if Self::is_early_close(today) {
                skipped.push(SkippedDay {
                    date: today,
                    reason: SkipReason::EarlyClose,
                    label: None,
                });
            }
        } else {
            skipped.push(Self::skipped_day(today));
        }

        for offset in 1..=MAX_SCAN_DAYS {
            let date = today + Duration::days(offset);
            if Self::is_open(date) {
                return Self::build_settlement(date, offset, skipped);
            }
            skipped.push(Self::skipped_day(date));
        }

        None
    }

    fn skipped_day(date: NaiveDate) -> SkippedDay {
        if Self::is_weekend(date) {
            SkippedDay {
                date,
                reason: SkipReason::Weekend,
                label: None,
            }
        } else {
            SkippedDay {
                date,
                reason: SkipReason::Holiday,
                label: Self::holiday_name(date).map(str::to_string),
            }
        }
    }

    fn build_settlement(
        date: NaiveDate,
        days_until: i64,
        skipped_days: Vec<SkippedDay>,
    ) -> Option<SettlementInfo> {
        let close = Self::close_time_et(date);
        let et_close = New_York
            .from_local_datetime(&date.and_time(close))
            .earliest()?;
        let kst_close = et_close.with_timezone(&Seoul);

        Some(SettlementInfo {
            target_date: date,
            day_name: format!("{:?}", date.weekday()),
            is_today: days_until == 0,
            days_until,
            is_early_close: Self::is_early_close(date),
            execution_at: et_close.with_timezone(&Utc),
            execution_time_et: format!("{} ET", et_close.format("%Y-%m-%d %H:%M")),
            execution_time_kst: format!("{} KST", kst_close.format("%Y-%m-%d %H:%M")),
            kst_offset_hours: Self::kst_offset_hours(date),
            skipped_days,
        })
    }
}

/// 주말 보정 (토 → 금, 일 → 월).
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

/// 해당 월의 n번째 요일 (1부터 시작).
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

/// 해당 월의 마지막 요일.
fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let mut date = first_of_next - Duration::days(1);
    while date.weekday() != weekday {
        date -= Duration::days(1);
    }
    Some(date)
}

/// 추수감사절 (11월 넷째 목요일).
fn thanksgiving(year: i32) -> Option<NaiveDate> {
    nth_weekday(year, 11, Weekday::Thu, 4)
}

/// 그레고리력 부활절 (Meeus/Jones/Butcher 알고리즘).
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}
