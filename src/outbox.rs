// Worker-thread delivery into an iced subscription channel.
//
// A full channel never loses the newest update: it is parked, merged with whatever
// arrives next, and retried. Only a closed channel stops the worker.
use std::thread;
use std::time::Duration;

use iced::futures::channel::mpsc;

const SETTLE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The channel is full; the update is parked until the next push or flush.
    Parked,
    Closed,
}

pub struct Outbox<T> {
    sender: mpsc::Sender<T>,
    parked: Option<T>,
}

impl<T> Outbox<T> {
    pub fn new(sender: mpsc::Sender<T>) -> Self {
        Self {
            sender,
            parked: None,
        }
    }

    /// Deliver `item`, folding it into a parked update with `merge(parked, item)`.
    pub fn push(&mut self, item: T, merge: impl FnOnce(T, T) -> T) -> Delivery {
        let item = match self.parked.take() {
            Some(parked) => merge(parked, item),
            None => item,
        };
        self.offer(item)
    }

    /// Retry a parked update.
    pub fn flush(&mut self) -> Delivery {
        match self.parked.take() {
            Some(item) => self.offer(item),
            None if self.sender.is_closed() => Delivery::Closed,
            None => Delivery::Sent,
        }
    }

    /// Block until the parked update is delivered or the channel closes.
    pub fn settle(&mut self) -> Delivery {
        loop {
            match self.flush() {
                Delivery::Parked => thread::sleep(SETTLE_POLL),
                done => return done,
            }
        }
    }

    pub fn is_parked(&self) -> bool {
        self.parked.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn offer(&mut self, item: T) -> Delivery {
        match self.sender.try_send(item) {
            Ok(()) => Delivery::Sent,
            Err(err) if err.is_disconnected() => Delivery::Closed,
            Err(err) => {
                self.parked = Some(err.into_inner());
                Delivery::Parked
            }
        }
    }
}

/// Merge policy for snapshots where only the newest matters.
pub fn latest<T>(_parked: T, item: T) -> T {
    item
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(receiver: &mut mpsc::Receiver<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Ok(Some(item)) = receiver.try_next() {
            out.push(item);
        }
        out
    }

    #[test]
    fn full_channel_parks_and_merges_until_flushed() {
        let (sender, mut receiver) = mpsc::channel(0);
        let mut outbox = Outbox::new(sender);

        assert_eq!(outbox.push(1, latest), Delivery::Sent);
        assert_eq!(outbox.push(2, latest), Delivery::Parked);
        assert_eq!(outbox.push(3, |a, b| a * 10 + b), Delivery::Parked);
        assert!(outbox.is_parked());

        assert_eq!(drain(&mut receiver), vec![1]);
        assert_eq!(outbox.flush(), Delivery::Sent);
        assert!(!outbox.is_parked());
        assert_eq!(drain(&mut receiver), vec![23]);
    }

    #[test]
    fn pushes_keep_flowing_after_the_channel_was_full() {
        let (sender, mut receiver) = mpsc::channel(2);
        let mut outbox = Outbox::new(sender);

        for value in 0..40 {
            assert_ne!(outbox.push(value, latest), Delivery::Closed);
        }
        let burst = drain(&mut receiver);
        assert!(burst.len() < 40);

        assert_eq!(outbox.push(99, latest), Delivery::Sent);
        assert_eq!(drain(&mut receiver).last(), Some(&99));
    }

    #[test]
    fn dropped_receiver_reports_closed() {
        let (sender, receiver) = mpsc::channel(1);
        let mut outbox = Outbox::new(sender);
        drop(receiver);

        assert_eq!(outbox.push(1, latest), Delivery::Closed);
        assert_eq!(outbox.flush(), Delivery::Closed);
        assert_eq!(outbox.settle(), Delivery::Closed);
        assert!(outbox.is_closed());
    }

    #[test]
    fn settle_waits_for_the_receiver_to_drain() {
        let (sender, mut receiver) = mpsc::channel(0);
        let mut outbox = Outbox::new(sender);
        assert_eq!(outbox.push(1, latest), Delivery::Sent);
        assert_eq!(outbox.push(2, latest), Delivery::Parked);

        let reader = thread::spawn(move || {
            let mut seen = Vec::new();
            while seen.len() < 2 {
                match receiver.try_next() {
                    Ok(Some(item)) => seen.push(item),
                    Ok(None) => break,
                    Err(_) => thread::sleep(Duration::from_millis(5)),
                }
            }
            seen
        });

        assert_eq!(outbox.settle(), Delivery::Sent);
        assert_eq!(reader.join().expect("reader thread"), vec![1, 2]);
    }
}
