//! 時刻ソース
//!
//! ストア・コレクター・アラートエンジンは `Arc<dyn Clock>` を受け取り、
//! タイムスタンプ、保持期間、クールダウンをすべてここから計算する。

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 現在時刻を返すソース
pub trait Clock: Send + Sync {
    /// 現在時刻
    fn now(&self) -> DateTime<Utc>;
}

/// 実時間クロック
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手動で進めるクロック（テスト用の仮想時間）
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// 指定時刻から開始するクロックを作成
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// 時刻を進める
    pub fn advance(&self, by: Duration) {
        let mut current = self.lock();
        if let Some(next) = current.checked_add_signed(to_chrono(by)) {
            *current = next;
        }
    }

    /// 時刻を設定
    pub fn set(&self, at: DateTime<Utc>) {
        *self.lock() = at;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // 保持値は DateTime のみなので poison されても値は壊れない
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// 既定のクロック
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// `std::time::Duration` を chrono の Duration に変換（範囲外は最大値に丸める）
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// `at - by`（表現範囲外は最小時刻に丸める）
pub fn saturating_sub(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(to_chrono(by))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// 2時刻間の経過時間（負の場合はゼロ）
pub fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}
