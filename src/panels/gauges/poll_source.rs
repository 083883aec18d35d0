// Background sampler for gauges whose data comes from slow commands or D-Bus calls.
use crate::panels::gauges::gauge::{GaugeEventSource, GaugeReadyNotify};
use std::sync::mpsc;
use std::time::Duration;

type Sampler<T> = Box<dyn FnMut() -> T + Send>;

/// Event source that calls `sample` every `interval` (or when woken) and forwards
/// changed values to its gauge.
pub struct PollSource<T> {
    gauge_id: &'static str,
    interval: Duration,
    sample: Sampler<T>,
    value_tx: mpsc::Sender<T>,
    wake_rx: mpsc::Receiver<()>,
}

/// Gauge-side end of a [`PollSource`].
pub struct PollHandle<T> {
    value_rx: mpsc::Receiver<T>,
    wake_tx: mpsc::Sender<()>,
}

impl<T> PollHandle<T> {
    /// Most recent value sent since the last call.
    pub fn latest(&self) -> Option<T> {
        let mut latest = None;
        while let Ok(value) = self.value_rx.try_recv() {
            latest = Some(value);
        }
        latest
    }

    /// Sender that makes the source sample again right away. Click callbacks use it after
    /// running a command.
    pub fn waker(&self) -> mpsc::Sender<()> {
        self.wake_tx.clone()
    }
}

pub fn poller<T, F>(
    gauge_id: &'static str,
    interval: Duration,
    sample: F,
) -> (PollHandle<T>, PollSource<T>)
where
    F: FnMut() -> T + Send + 'static,
{
    let (value_tx, value_rx) = mpsc::channel();
    let (wake_tx, wake_rx) = mpsc::channel();
    (
        PollHandle { value_rx, wake_tx },
        PollSource {
            gauge_id,
            interval,
            sample: Box::new(sample),
            value_tx,
            wake_rx,
        },
    )
}

impl<T> PollSource<T>
where
    T: PartialEq + Clone,
{
    /// Sample once and report whether the gauge should be woken.
    fn poll(&mut self, last: &mut Option<T>) -> Result<bool, mpsc::SendError<T>> {
        let value = (self.sample)();
        if last.as_ref() == Some(&value) {
            return Ok(false);
        }
        *last = Some(value.clone());
        self.value_tx.send(value)?;
        Ok(true)
    }
}

impl<T> GaugeEventSource for PollSource<T>
where
    T: PartialEq + Clone + Send + 'static,
{
    fn run(mut self: Box<Self>, notify: GaugeReadyNotify) {
        let mut last = None;
        loop {
            match self.poll(&mut last) {
                Ok(true) => notify(self.gauge_id),
                Ok(false) => {}
                Err(_) => {
                    log::debug!("{}: gauge dropped, stopping poller", self.gauge_id);
                    return;
                }
            }

            match self.wake_rx.recv_timeout(self.interval) {
                Ok(()) => {
                    // Collapse bursts of wake requests into one sample.
                    while self.wake_rx.try_recv().is_ok() {}
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn only_changed_values_are_forwarded() {
        let mut values = vec![1, 1, 2].into_iter();
        let (handle, mut source) = poller("test", Duration::from_millis(1), move || {
            values.next().unwrap_or(2)
        });

        let mut last = None;
        assert_eq!(source.poll(&mut last), Ok(true));
        assert_eq!(source.poll(&mut last), Ok(false));
        assert_eq!(source.poll(&mut last), Ok(true));
        assert_eq!(handle.latest(), Some(2));
        assert_eq!(handle.latest(), None);
    }

    #[test]
    fn notifies_gauge_and_stops_when_handle_drops() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (handle, source) = poller("test", Duration::from_secs(60), {
            let counter = Arc::clone(&counter);
            move || counter.fetch_add(1, Ordering::SeqCst)
        });
        let notified = Arc::new(AtomicUsize::new(0));
        let notify: GaugeReadyNotify = {
            let notified = Arc::clone(&notified);
            Arc::new(move |_| {
                notified.fetch_add(1, Ordering::SeqCst);
            })
        };

        let worker = thread::spawn(move || Box::new(source).run(notify));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while notified.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(handle.latest(), Some(0));

        drop(handle);
        worker.join().expect("poller thread exits");
    }
}
