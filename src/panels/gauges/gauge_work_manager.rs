// Gauge scheduler: one worker thread runs every gauge in the bar layout and ships
// batches of changed models to the UI.
// Consumes Settings: halcyon.gauge.work.max_run_ms, halcyon.gauge.work.max_run_strikes.
use crate::bar::Message;
use crate::icon::SLOW_GAUGE_GLYPH;
use crate::outbox::{Delivery, Outbox};
use crate::panels::gauges::gauge::{
    Gauge, GaugeActionDialog, GaugeDisplay, GaugeEventSource, GaugeMenu, GaugeModel,
    GaugeReadyNotify, GaugeRegistrar, GaugeWake, RunOutcome,
};
use crate::panels::gauges::gauge_registry;
use crate::settings;
use iced::Subscription;
use iced::futures::channel::mpsc;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, mpsc as sync_mpsc};
use std::thread;
use std::time::{Duration, Instant};

const IDLE_WAIT: Duration = Duration::from_millis(250);
/// Retry interval for a batch the UI has not accepted yet.
const PARKED_RETRY: Duration = Duration::from_millis(50);

type BatchStream = Box<dyn iced::futures::Stream<Item = Message> + Send + Unpin>;

/// Gauge subscription keyed by the ids in the bar layout.
pub fn subscription(gauges: &[String]) -> Subscription<Message> {
    if gauges.is_empty() {
        return Subscription::none();
    }
    let ids: Arc<[String]> = gauges.iter().cloned().collect();
    Subscription::run_with(ids, scheduler_stream)
}

fn scheduler_stream(ids: &Arc<[String]>) -> BatchStream {
    let (sender, receiver) = mpsc::channel(16);
    let ids = ids.clone();
    thread::spawn(move || run_scheduler(&ids, Outbox::new(sender)));
    Box::new(receiver)
}

fn run_scheduler(ids: &[String], mut outbox: Outbox<Message>) {
    let (wake_tx, wake_rx) = sync_mpsc::channel::<&'static str>();
    let notify: GaugeReadyNotify = Arc::new(move |id| {
        let _ = wake_tx.send(id);
    });

    let now = Instant::now();
    let gauges: Vec<Box<dyn Gauge>> = ids
        .iter()
        .filter_map(|id| gauge_registry::create_gauge(id, now))
        .collect();
    if gauges.is_empty() {
        log::warn!("No known gauges in {ids:?}; gauge scheduler not started");
        return;
    }

    let settings = settings::settings();
    let policy = StrikePolicy::new(
        Duration::from_millis(settings.get_parsed_or("halcyon.gauge.work.max_run_ms", 40u64)),
        settings.get_parsed_or("halcyon.gauge.work.max_run_strikes", 3u8),
    );
    let mut scheduler = Scheduler::new(SystemClock, policy, notify, gauges);

    loop {
        let mut wait = scheduler.idle_for();
        if outbox.is_parked() {
            wait = wait.min(PARKED_RETRY);
        }
        collect_wakes(&wake_rx, &mut scheduler, wait);

        let delivery = match scheduler.step() {
            Some(batch) => outbox.push(Message::GaugeBatch(batch), merge_batches),
            None => outbox.flush(),
        };
        match delivery {
            Delivery::Sent => {}
            Delivery::Parked => log::debug!("UI is behind; holding gauge updates"),
            Delivery::Closed => {
                log::debug!("Gauge subscription closed; stopping scheduler");
                return;
            }
        }
    }
}

// Sleep until `wait` elapses or a gauge asks to run, then take every pending wake.
fn collect_wakes<C: Clock>(
    wake_rx: &sync_mpsc::Receiver<&'static str>,
    scheduler: &mut Scheduler<C>,
    wait: Duration,
) {
    if !wait.is_zero()
        && let Ok(id) = wake_rx.recv_timeout(wait)
    {
        scheduler.wake(id);
    }
    while let Ok(id) = wake_rx.try_recv() {
        scheduler.wake(id);
    }
}

fn merge_batches(parked: Message, newer: Message) -> Message {
    match (parked, newer) {
        (Message::GaugeBatch(older), Message::GaugeBatch(newer)) => {
            Message::GaugeBatch(merge_models(older, newer))
        }
        (_, newer) => newer,
    }
}

/// Fold `newer` into `older`; the newest model per gauge wins and keeps its slot.
fn merge_models(mut older: Vec<GaugeModel>, newer: Vec<GaugeModel>) -> Vec<GaugeModel> {
    for model in newer {
        match older.iter_mut().find(|existing| existing.id == model.id) {
            Some(existing) => *existing = model,
            None => older.push(model),
        }
    }
    older
}

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// How long a gauge may run and how many slow runs in a row it gets.
#[derive(Debug, Clone, Copy)]
pub struct StrikePolicy {
    budget: Duration,
    limit: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Within,
    Strike(u8),
    Retire,
}

impl StrikePolicy {
    pub fn new(budget: Duration, limit: u8) -> Self {
        Self {
            budget,
            limit: limit.max(1),
        }
    }

    // A run within budget forgives earlier strikes.
    fn judge(&self, strikes: &mut u8, elapsed: Duration) -> Verdict {
        if elapsed <= self.budget {
            *strikes = 0;
            return Verdict::Within;
        }
        *strikes = strikes.saturating_add(1);
        if *strikes >= self.limit {
            Verdict::Retire
        } else {
            Verdict::Strike(*strikes)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Deadline {
    at: Instant,
    slot: usize,
    generation: u64,
}

struct Slot {
    gauge: Box<dyn Gauge>,
    retired: bool,
    due: Instant,
    generation: u64,
    strikes: u8,
    runs: u64,
}

impl Slot {
    fn new(gauge: Box<dyn Gauge>) -> Self {
        let due = gauge.next_deadline();
        Self {
            gauge,
            retired: false,
            due,
            generation: 0,
            strikes: 0,
            runs: 0,
        }
    }

    fn deadline(&self, slot: usize) -> Deadline {
        Deadline {
            at: self.due,
            slot,
            generation: self.generation,
        }
    }

    // Older heap entries for this slot stop matching once the generation moves on.
    fn reschedule(&mut self, slot: usize) -> Deadline {
        self.due = self.gauge.next_deadline();
        self.generation = self.generation.wrapping_add(1);
        self.deadline(slot)
    }

    fn is_current(&self, deadline: &Deadline) -> bool {
        !self.retired && self.generation == deadline.generation && self.due == deadline.at
    }
}

/// FIFO of woken slots; a slot is queued at most once.
#[derive(Debug, Default)]
struct WakeQueue {
    order: VecDeque<usize>,
    queued: Vec<bool>,
}

impl WakeQueue {
    fn with_slots(count: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(count),
            queued: vec![false; count],
        }
    }

    fn push(&mut self, slot: usize) -> bool {
        if self.queued[slot] {
            return false;
        }
        self.queued[slot] = true;
        self.order.push_back(slot);
        true
    }

    fn pop(&mut self) -> Option<usize> {
        let slot = self.order.pop_front()?;
        self.queued[slot] = false;
        Some(slot)
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Decides which models reach the UI.
///
/// A model that renders like the last one shown is dropped, unless it carries an OSD
/// serial the bar has not seen yet.
#[derive(Default)]
struct EmitFilter {
    shown: HashMap<&'static str, GaugeModel>,
    osd_serials: HashMap<&'static str, u64>,
}

impl EmitFilter {
    fn admit(&mut self, model: &GaugeModel) -> bool {
        let fresh_osd = model
            .osd
            .as_ref()
            .is_some_and(|osd| self.osd_serials.insert(model.id, osd.serial) != Some(osd.serial));
        let changed = self
            .shown
            .get(model.id)
            .is_none_or(|shown| !renders_same(shown, model));
        if fresh_osd || changed {
            self.shown.insert(model.id, model.clone());
            true
        } else {
            false
        }
    }
}

/// Runs gauges sequentially on deadlines or wakes and enforces the strike policy.
pub struct Scheduler<C: Clock> {
    clock: C,
    policy: StrikePolicy,
    slots: Vec<Slot>,
    by_id: HashMap<&'static str, usize>,
    deadlines: BinaryHeap<Reverse<Deadline>>,
    woken: WakeQueue,
    filter: EmitFilter,
}

impl<C: Clock> Scheduler<C> {
    /// Take ownership of `gauges`, start their event sources and schedule first runs.
    pub fn new(
        clock: C,
        policy: StrikePolicy,
        notify: GaugeReadyNotify,
        gauges: Vec<Box<dyn Gauge>>,
    ) -> Self {
        let mut slots = Vec::with_capacity(gauges.len());
        let mut by_id = HashMap::new();
        let mut deadlines = BinaryHeap::new();

        for mut gauge in gauges {
            gauge.bind_ready_notify(notify.clone());
            let mut sources = SourceList::default();
            gauge.register(&mut sources);
            for source in sources.0 {
                let notify = notify.clone();
                thread::spawn(move || source.run(notify));
            }

            let index = slots.len();
            let slot = Slot::new(gauge);
            by_id.insert(slot.gauge.id(), index);
            deadlines.push(Reverse(slot.deadline(index)));
            slots.push(slot);
        }

        Self {
            clock,
            policy,
            woken: WakeQueue::with_slots(slots.len()),
            slots,
            by_id,
            deadlines,
            filter: EmitFilter::default(),
        }
    }

    /// Queue a gauge to run on the next step; false if unknown, retired or already queued.
    pub fn wake(&mut self, id: &str) -> bool {
        match self.by_id.get(id) {
            Some(&index) if !self.slots[index].retired => self.woken.push(index),
            _ => false,
        }
    }

    /// Time until the earliest live deadline; zero when a gauge is already woken.
    pub fn idle_for(&mut self) -> Duration {
        if !self.woken.is_empty() {
            return Duration::ZERO;
        }
        let now = self.clock.now();
        while let Some(Reverse(deadline)) = self.deadlines.peek().copied() {
            if self.slots[deadline.slot].is_current(&deadline) {
                return deadline.at.saturating_duration_since(now);
            }
            self.deadlines.pop();
        }
        IDLE_WAIT
    }

    /// Run every due or woken gauge once; `None` when nothing new reaches the UI.
    pub fn step(&mut self) -> Option<Vec<GaugeModel>> {
        let now = self.clock.now();
        let mut batch = Vec::new();
        for (index, wake) in self.runnable(now) {
            if let Some(model) = self.run_slot(index, wake, now) {
                batch.push(model);
            }
        }
        (!batch.is_empty()).then_some(batch)
    }

    // Due slots in slot order; a wake marks the run as external even when also due.
    fn runnable(&mut self, now: Instant) -> BTreeMap<usize, GaugeWake> {
        let mut runnable = BTreeMap::new();
        while let Some(Reverse(deadline)) = self.deadlines.peek().copied() {
            if deadline.at > now {
                break;
            }
            self.deadlines.pop();
            if self.slots[deadline.slot].is_current(&deadline) {
                runnable.insert(deadline.slot, GaugeWake::Timer);
            }
        }
        while let Some(index) = self.woken.pop() {
            if !self.slots[index].retired {
                runnable.insert(index, GaugeWake::ExternalEvent);
            }
        }
        runnable
    }

    fn run_slot(&mut self, index: usize, wake: GaugeWake, now: Instant) -> Option<GaugeModel> {
        let slot = &mut self.slots[index];
        let started = self.clock.now();
        let outcome = slot.gauge.run(wake, now);
        let elapsed = self.clock.now().saturating_duration_since(started);
        slot.runs = slot.runs.saturating_add(1);
        let id = slot.gauge.id();

        match self.policy.judge(&mut slot.strikes, elapsed) {
            Verdict::Within => {}
            Verdict::Strike(count) => log::warn!(
                "Gauge '{id}' ran for {}ms (strike {count}/{})",
                elapsed.as_millis(),
                self.policy.limit
            ),
            Verdict::Retire => {
                log::error!("Gauge '{id}' retired after repeated slow runs");
                slot.retired = true;
                let model = slow_gauge_model(id);
                self.filter.admit(&model);
                return Some(model);
            }
        }

        self.deadlines.push(Reverse(slot.reschedule(index)));
        match outcome {
            RunOutcome::ModelChanged(model) if self.filter.admit(&model) => Some(*model),
            _ => None,
        }
    }

    #[cfg(test)]
    fn slot(&self, id: &str) -> &Slot {
        &self.slots[self.by_id[id]]
    }
}

#[derive(Default)]
struct SourceList(Vec<Box<dyn GaugeEventSource>>);

impl GaugeRegistrar for SourceList {
    fn add_event_source(&mut self, source: Box<dyn GaugeEventSource>) {
        self.0.push(source);
    }
}

fn slow_gauge_model(id: &'static str) -> GaugeModel {
    GaugeModel::new(id, Some(SLOW_GAUGE_GLYPH.to_string()), GaugeDisplay::Empty)
}

// Callbacks are not comparable, so two models render the same when their data matches.
// The OSD is left to the serial check in `EmitFilter`.
fn renders_same(a: &GaugeModel, b: &GaugeModel) -> bool {
    a.id == b.id
        && a.icon == b.icon
        && a.display == b.display
        && a.info == b.info
        && menu_equal(a.menu.as_ref(), b.menu.as_ref())
        && action_dialog_equal(a.action_dialog.as_ref(), b.action_dialog.as_ref())
}

fn menu_equal(a: Option<&GaugeMenu>, b: Option<&GaugeMenu>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.title == b.title && a.items == b.items,
        _ => false,
    }
}

fn action_dialog_equal(a: Option<&GaugeActionDialog>, b: Option<&GaugeActionDialog>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.title == b.title && a.items == b.items,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panels::gauges::gauge::GaugeOsd;
    use std::sync::Mutex;

    const MS: Duration = Duration::from_millis(1);

    /// Test clock that only moves when told to.
    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<Instant>>);

    impl ManualClock {
        fn starting_at(start: Instant) -> Self {
            Self(Arc::new(Mutex::new(start)))
        }

        fn advance(&self, by: Duration) {
            if let Ok(mut now) = self.0.lock() {
                *now += by;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.0.lock().map(|now| *now).unwrap_or_else(|_| Instant::now())
        }
    }

    /// Emits "<id> <run count>" (or a fixed text) and records how it was woken.
    struct Scripted {
        id: &'static str,
        clock: ManualClock,
        due: Instant,
        every: Duration,
        cost: Duration,
        fixed_text: Option<&'static str>,
        runs: u32,
        wakes: Arc<Mutex<Vec<GaugeWake>>>,
    }

    impl Scripted {
        fn new(id: &'static str, clock: &ManualClock, first_in: Duration) -> Self {
            let due = clock.now() + first_in;
            Self {
                id,
                clock: clock.clone(),
                due,
                every: Duration::from_secs(1),
                cost: Duration::ZERO,
                fixed_text: None,
                runs: 0,
                wakes: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Gauge for Scripted {
        fn id(&self) -> &'static str {
            self.id
        }

        fn next_deadline(&self) -> Instant {
            self.due
        }

        fn run_once(&mut self, now: Instant) -> Option<GaugeModel> {
            self.clock.advance(self.cost);
            self.runs += 1;
            self.due = now + self.every;
            let text = match self.fixed_text {
                Some(text) => text.to_string(),
                None => format!("{} {}", self.id, self.runs),
            };
            Some(GaugeModel::new(self.id, None, GaugeDisplay::text(text)))
        }

        fn run(&mut self, wake: GaugeWake, now: Instant) -> RunOutcome {
            if let Ok(mut wakes) = self.wakes.lock() {
                wakes.push(wake);
            }
            match self.run_once(now) {
                Some(model) => RunOutcome::ModelChanged(Box::new(model)),
                None => RunOutcome::NoChange,
            }
        }
    }

    fn scheduler(clock: &ManualClock, gauges: Vec<Scripted>) -> Scheduler<ManualClock> {
        Scheduler::new(
            clock.clone(),
            StrikePolicy::new(40 * MS, 3),
            Arc::new(|_| {}),
            gauges
                .into_iter()
                .map(|gauge| Box::new(gauge) as Box<dyn Gauge>)
                .collect(),
        )
    }

    fn ids(batch: &[GaugeModel]) -> Vec<&'static str> {
        batch.iter().map(|model| model.id).collect()
    }

    fn osd_model(text: &str, serial: u64) -> GaugeModel {
        let mut model = GaugeModel::new("audio", None, GaugeDisplay::text(text));
        model.osd = Some(GaugeOsd {
            glyph: "󰕾".to_string(),
            level: 0.4,
            serial,
        });
        model
    }

    #[test]
    fn timer_runs_due_gauges_in_layout_order() {
        let clock = ManualClock::starting_at(Instant::now());
        let mut scheduler = scheduler(
            &clock,
            vec![
                Scripted::new("late", &clock, 30 * MS),
                Scripted::new("early", &clock, 10 * MS),
                Scripted::new("mid", &clock, 20 * MS),
            ],
        );

        assert_eq!(scheduler.idle_for(), 10 * MS);
        assert!(scheduler.step().is_none());

        clock.advance(20 * MS);
        let batch = scheduler.step().expect("two gauges are due");
        assert_eq!(ids(&batch), vec!["early", "mid"]);
        assert_eq!(scheduler.slot("late").runs, 0);
        assert_eq!(scheduler.idle_for(), 10 * MS);
    }

    #[test]
    fn woken_gauge_runs_once_before_its_deadline() {
        let clock = ManualClock::starting_at(Instant::now());
        let gauge = Scripted::new("mpris", &clock, Duration::from_secs(60));
        let wakes = gauge.wakes.clone();
        let mut scheduler = scheduler(&clock, vec![gauge]);

        assert!(scheduler.wake("mpris"));
        assert!(!scheduler.wake("mpris"));
        assert!(!scheduler.wake("unknown"));
        assert_eq!(scheduler.idle_for(), Duration::ZERO);

        let batch = scheduler.step().expect("woken gauge emits");
        assert_eq!(ids(&batch), vec!["mpris"]);
        assert_eq!(scheduler.slot("mpris").runs, 1);
        assert_eq!(
            wakes.lock().map(|wakes| wakes.clone()).unwrap_or_default(),
            vec![GaugeWake::ExternalEvent]
        );
        assert!(scheduler.wake("mpris"));
    }

    #[test]
    fn repeated_renders_are_held_back() {
        let clock = ManualClock::starting_at(Instant::now());
        let mut gauge = Scripted::new("cpu", &clock, Duration::from_secs(60));
        gauge.fixed_text = Some("12%");
        let mut scheduler = scheduler(&clock, vec![gauge]);

        scheduler.wake("cpu");
        assert!(scheduler.step().is_some());
        scheduler.wake("cpu");
        assert!(scheduler.step().is_none());
        assert_eq!(scheduler.slot("cpu").runs, 2);
    }

    #[test]
    fn fresh_osd_serial_passes_even_with_the_same_render() {
        let mut filter = EmitFilter::default();

        assert!(filter.admit(&osd_model("40%", 1)));
        assert!(!filter.admit(&osd_model("40%", 1)));
        assert!(filter.admit(&osd_model("40%", 2)));
        assert!(filter.admit(&osd_model("45%", 2)));
        assert!(!filter.admit(&osd_model("45%", 2)));
    }

    #[test]
    fn slow_gauge_is_retired_with_a_final_model() {
        let clock = ManualClock::starting_at(Instant::now());
        let mut gauge = Scripted::new("gpu", &clock, Duration::ZERO);
        gauge.every = MS;
        gauge.cost = 50 * MS;
        let mut scheduler = Scheduler::new(
            clock.clone(),
            StrikePolicy::new(40 * MS, 2),
            Arc::new(|_| {}),
            vec![Box::new(gauge)],
        );

        let first = scheduler.step().expect("first slow run still renders");
        assert_eq!(first[0].icon, None);
        assert_eq!(scheduler.slot("gpu").strikes, 1);

        clock.advance(MS);
        let last = scheduler.step().expect("retirement emits the slow model");
        assert_eq!(last[0].icon.as_deref(), Some(SLOW_GAUGE_GLYPH));
        assert!(matches!(last[0].display, GaugeDisplay::Empty));
        assert!(scheduler.slot("gpu").retired);
        assert!(!scheduler.wake("gpu"));

        clock.advance(Duration::from_secs(5));
        assert!(scheduler.step().is_none());
        assert_eq!(scheduler.idle_for(), IDLE_WAIT);
    }

    #[test]
    fn fast_run_forgives_earlier_strikes() {
        let policy = StrikePolicy::new(40 * MS, 3);
        let mut strikes = 0;

        assert_eq!(policy.judge(&mut strikes, 41 * MS), Verdict::Strike(1));
        assert_eq!(policy.judge(&mut strikes, 90 * MS), Verdict::Strike(2));
        assert_eq!(policy.judge(&mut strikes, 40 * MS), Verdict::Within);
        assert_eq!(strikes, 0);
        assert_eq!(StrikePolicy::new(MS, 0).judge(&mut strikes, 2 * MS), Verdict::Retire);
    }

    #[test]
    fn empty_scheduler_idles() {
        let clock = ManualClock::starting_at(Instant::now());
        let mut scheduler = scheduler(&clock, Vec::new());
        assert_eq!(scheduler.idle_for(), IDLE_WAIT);
        assert!(scheduler.step().is_none());
    }

    #[test]
    fn parked_batches_merge_newest_model_per_gauge() {
        let older = vec![
            GaugeModel::new("cpu", None, GaugeDisplay::text("10%")),
            osd_model("40%", 1),
        ];
        let newer = vec![
            osd_model("50%", 2),
            GaugeModel::new("clock", None, GaugeDisplay::text("12:00")),
        ];

        let Message::GaugeBatch(merged) =
            merge_batches(Message::GaugeBatch(older), Message::GaugeBatch(newer))
        else {
            panic!("merged message should stay a gauge batch");
        };

        assert_eq!(ids(&merged), vec!["cpu", "audio", "clock"]);
        assert_eq!(merged[1].display, GaugeDisplay::text("50%"));
        assert_eq!(merged[1].osd.as_ref().map(|osd| osd.serial), Some(2));
    }
}
