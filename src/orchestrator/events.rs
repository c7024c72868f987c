//! ステータスイベントの配信先

use media_harvest_common::StatusEvent;
use tokio::sync::mpsc;

/// 実行に紐づくリスナー
///
/// 実行状態のロックを解放した後に、発生順で呼ばれる。
pub trait StatusObserver: Send + Sync {
    fn on_status(&self, event: &StatusEvent);
}

impl StatusObserver for mpsc::UnboundedSender<StatusEvent> {
    fn on_status(&self, event: &StatusEvent) {
        // 受信側が閉じていれば捨てる
        let _ = self.send(event.clone());
    }
}

/// クロージャをリスナーとして使う
pub struct FnObserver<F>(pub F);

impl<F> StatusObserver for FnObserver<F>
where
    F: Fn(&StatusEvent) + Send + Sync,
{
    fn on_status(&self, event: &StatusEvent) {
        (self.0)(event)
    }
}
