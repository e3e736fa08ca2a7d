//! The pooled engine: fresh/used instance queues, three background
//! tasks and the public `get` / `validate` / `reconfigure` /
//! `shutdown` surface.
//!
//! All cross-task traffic flows through bounded channels. Blocking
//! reads tick at one second so every task observes the stop signal
//! promptly; the only shared mutable state is the validator's
//! consumed-token set behind its mutex.

use crate::{
    captcha::Captcha,
    error::Error,
    settings::{RateLimit, Settings},
    token::TokenCodec,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, error, warn};
use rustc_hash::FxHashSet;
use std::{
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

/// Granularity of every blocking channel read in a background task.
const TICK: Duration = Duration::from_secs(1);
/// Wall-clock budget for draining fresh instances while averaging
/// their stats; keeps `stats` from stalling under aggressive rate
/// limiting.
const STATS_DRAIN_BUDGET: Duration = Duration::from_secs(5);
/// Seconds between expiry sweeps over the consumed-token set.
const SWEEP_TICKS: u32 = 30;
/// One stop token per background task.
const STOP_TOKENS: usize = 3;

/// A served CAPTCHA: the encoded image and the sealed solution token.
#[derive(Clone, Debug)]
pub struct Challenge {
    /// Encoded image bytes in the configured format.
    pub blob: Vec<u8>,
    /// Opaque token; hand it back to [`Engine::validate`] together
    /// with the user's answer.
    pub token: String,
}

/// State shared between the engine handle and its background tasks.
struct SharedState {
    current: Mutex<Settings>,
    codec: TokenCodec,
    pool_size: usize,
}

/// Consumes at most one stop token, remembering that it did.
struct StopSignal {
    rx: Receiver<()>,
    seen: bool,
}

impl StopSignal {
    fn new(rx: Receiver<()>) -> Self {
        StopSignal { rx, seen: false }
    }

    fn seen(&mut self) -> bool {
        if !self.seen && self.rx.try_recv().is_ok() {
            self.seen = true;
        }
        self.seen
    }
}

/// CAPTCHA generation and validation backend.
///
/// `new` spawns a generator task that fills a bounded pool of
/// pre-rendered [`Captcha`] instances, a refresher task that recycles
/// consumed instances back into the pool, and a validator task that
/// enforces single use of every token. The handle itself is cheap to
/// share behind an `Arc`; all methods take `&self`.
pub struct Engine {
    shared: Arc<SharedState>,
    created: Instant,
    issued: AtomicU64,
    validation_attempts: AtomicU64,
    solves: AtomicU64,
    shut_down: AtomicBool,
    final_stats: Mutex<Option<EngineStats>>,
    validate_rpc: Mutex<()>,
    fresh_tx: Sender<Captcha>,
    fresh_rx: Receiver<Captcha>,
    used_tx: Sender<Captcha>,
    used_rx: Receiver<Captcha>,
    to_validate_tx: Sender<String>,
    to_validate_rx: Receiver<String>,
    validation_result_rx: Receiver<bool>,
    settings_tx: Sender<Settings>,
    settings_rx: Receiver<Settings>,
    stop_tx: Sender<()>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Engine {
    /// Starts an engine for `settings`; returns immediately while the
    /// pool fills in the background.
    pub fn new(settings: Settings) -> Result<Self, Error> {
        let pool_size = settings.pool_size();
        let (fresh_tx, fresh_rx) = bounded(pool_size);
        let (used_tx, used_rx) = bounded(pool_size);
        let (to_validate_tx, to_validate_rx) = bounded(1);
        let (validation_result_tx, validation_result_rx) = bounded(1);
        let (settings_tx, settings_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded(STOP_TOKENS);

        let shared = Arc::new(SharedState {
            current: Mutex::new(settings),
            codec: TokenCodec::new(),
            pool_size,
        });

        let generator = {
            let shared = Arc::clone(&shared);
            let fresh_tx = fresh_tx.clone();
            let fresh_rx = fresh_rx.clone();
            let used_rx = used_rx.clone();
            let settings_rx = settings_rx.clone();
            let stop = StopSignal::new(stop_rx.clone());
            thread::Builder::new()
                .name("captcha-generator".into())
                .spawn(move || generator_task(shared, fresh_tx, fresh_rx, used_rx, settings_rx, stop))?
        };
        let refresher = {
            let shared = Arc::clone(&shared);
            let fresh_tx = fresh_tx.clone();
            let used_rx = used_rx.clone();
            let stop = StopSignal::new(stop_rx.clone());
            thread::Builder::new()
                .name("captcha-refresher".into())
                .spawn(move || refresher_task(shared, fresh_tx, used_rx, stop))?
        };
        let validator = {
            let shared = Arc::clone(&shared);
            let to_validate_rx = to_validate_rx.clone();
            let stop = StopSignal::new(stop_rx);
            thread::Builder::new()
                .name("captcha-validator".into())
                .spawn(move || validator_task(shared, to_validate_rx, validation_result_tx, stop))?
        };

        Ok(Engine {
            shared,
            created: Instant::now(),
            issued: AtomicU64::new(0),
            validation_attempts: AtomicU64::new(0),
            solves: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            final_stats: Mutex::new(None),
            validate_rpc: Mutex::new(()),
            fresh_tx,
            fresh_rx,
            used_tx,
            used_rx,
            to_validate_tx,
            to_validate_rx,
            validation_result_rx,
            settings_tx,
            settings_rx,
            stop_tx,
            handles: Mutex::new(vec![generator, refresher, validator]),
        })
    }

    /// Takes the next fresh CAPTCHA from the pool, blocking until one
    /// is available.
    pub fn get(&self) -> Result<Challenge, Error> {
        self.get_inner(None)
    }

    /// Like [`get`](Engine::get), additionally writing the encoded
    /// image to `path` before returning.
    pub fn get_and_save<P: AsRef<Path>>(&self, path: P) -> Result<Challenge, Error> {
        self.get_inner(Some(path.as_ref()))
    }

    fn get_inner(&self, save_path: Option<&Path>) -> Result<Challenge, Error> {
        self.ensure_running()?;
        let captcha = loop {
            match self.fresh_rx.recv_timeout(TICK) {
                Ok(captcha) => break captcha,
                Err(RecvTimeoutError::Timeout) => self.ensure_running()?,
                Err(RecvTimeoutError::Disconnected) => return Err(Error::ShutDown),
            }
        };
        let challenge = Challenge {
            blob: captcha.blob().to_vec(),
            token: self.shared.codec.seal(captcha.solution()),
        };
        let saved = match save_path {
            Some(path) => captcha.save(path),
            None => Ok(()),
        };
        // hand the instance to the refresher even when saving failed
        let _ = self.used_tx.send(captcha);
        saved?;
        self.issued.fetch_add(1, Ordering::Relaxed);
        Ok(challenge)
    }

    /// Checks `answer` against the solution sealed in `token`.
    ///
    /// Returns `Ok(true)` exactly once per token: the first call with a
    /// matching answer inside the token's lifetime. Expired, forged or
    /// already-consumed tokens and wrong answers all return
    /// `Ok(false)`; a wrong answer does not consume the token.
    pub fn validate(&self, token: &str, answer: &str) -> Result<bool, Error> {
        self.ensure_running()?;
        self.validation_attempts.fetch_add(1, Ordering::Relaxed);

        let (lifetime, case_sensitive) = {
            let settings = self.shared.current.lock().unwrap();
            (settings.lifetime_secs(), settings.case_sensitive())
        };
        let solution = match self.shared.codec.unseal(token, lifetime) {
            Ok(solution) => solution,
            Err(_) => return Ok(false),
        };
        let matches = if case_sensitive {
            answer == solution
        } else {
            answer.to_lowercase() == solution.to_lowercase()
        };
        if !matches {
            return Ok(false);
        }
        let first_use = self.first_use(token)?;
        if first_use {
            self.solves.fetch_add(1, Ordering::Relaxed);
        }
        Ok(first_use)
    }

    /// Asks the validator task whether `token` is being consumed for
    /// the first time. The send/receive pair is serialized so replies
    /// cannot cross between concurrent callers.
    fn first_use(&self, token: &str) -> Result<bool, Error> {
        let _serialized = self.validate_rpc.lock().unwrap();
        let mut pending = token.to_owned();
        loop {
            match self.to_validate_tx.send_timeout(pending, TICK) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(value)) => {
                    self.ensure_running()?;
                    pending = value;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(Error::ShutDown),
            }
        }
        loop {
            match self.validation_result_rx.recv_timeout(TICK) {
                Ok(first_use) => return Ok(first_use),
                Err(RecvTimeoutError::Timeout) => self.ensure_running()?,
                Err(RecvTimeoutError::Disconnected) => return Err(Error::ShutDown),
            }
        }
    }

    /// Posts a new configuration; the generator task re-renders every
    /// pooled instance under it. The pool size is fixed for the life of
    /// the engine.
    pub fn reconfigure(&self, settings: Settings) -> Result<(), Error> {
        self.ensure_running()?;
        if settings.pool_size() != self.shared.pool_size {
            return Err(Error::InvalidConfig {
                setting: "pool_size",
                reason: "cannot be changed on a running engine".to_owned(),
            });
        }
        *self.shared.current.lock().unwrap() = settings.clone();
        let mut pending = settings;
        loop {
            match self.settings_tx.send_timeout(pending, TICK) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(value)) => {
                    self.ensure_running()?;
                    pending = value;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(Error::ShutDown),
            }
        }
    }

    /// A copy of the configuration currently in force.
    pub fn settings(&self) -> Settings {
        self.shared.current.lock().unwrap().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stops the background tasks, drains every channel and joins all
    /// threads. The first call wins; later calls (and any other method
    /// afterwards) fail with [`Error::ShutDown`].
    pub fn shutdown(&self) -> Result<(), Error> {
        self.ensure_running()?;
        let mut final_stats = self.snapshot_stats();
        final_stats.shut_down = true;
        final_stats.fresh = 0;
        final_stats.used = 0;

        if self.shut_down.swap(true, Ordering::SeqCst) {
            // lost the race against a concurrent shutdown
            return Err(Error::ShutDown);
        }
        *self.final_stats.lock().unwrap() = Some(final_stats);

        for _ in 0..STOP_TOKENS {
            let _ = self.stop_tx.send(());
        }
        // every task consumes one token before winding down
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.stop_tx.is_empty() {
            if Instant::now() >= deadline {
                warn!("stop tokens left unconsumed, a task exited early");
                break;
            }
            thread::sleep(Duration::from_millis(250));
        }

        // fixed drain order, validation channels first
        while self.to_validate_rx.try_recv().is_ok() {}
        while self.validation_result_rx.try_recv().is_ok() {}
        while self.fresh_rx.try_recv().is_ok() {}
        while self.settings_rx.try_recv().is_ok() {}
        while self.used_rx.try_recv().is_ok() {}

        for handle in self.handles.lock().unwrap().drain(..) {
            if handle.join().is_err() {
                error!("a background task panicked before shutdown");
            }
        }
        debug!("engine shut down");
        Ok(())
    }

    /// Counters, rates and pool averages. After shutdown this returns
    /// the final snapshot taken at shutdown time.
    ///
    /// Live counters are read without synchronization; the numbers are
    /// best-effort.
    pub fn stats(&self) -> EngineStats {
        if self.is_shut_down() {
            if let Some(stats) = self.final_stats.lock().unwrap().clone() {
                return stats;
            }
        }
        self.snapshot_stats()
    }

    /// Prints the formatted stats report to stdout.
    pub fn print_stats(&self) {
        println!("{}", self.stats());
    }

    fn snapshot_stats(&self) -> EngineStats {
        let uptime = self.created.elapsed();
        let hours = uptime.as_secs_f64().max(0.001) / 3600.0;
        let distributed = self.issued.load(Ordering::Relaxed);
        let validation_attempts = self.validation_attempts.load(Ordering::Relaxed);
        let solves = self.solves.load(Ordering::Relaxed);
        let settings = self.settings();

        // briefly borrow up to a pool's worth of fresh instances to
        // average their counters, bounded so rate limiting cannot
        // stall the report
        let available = (self.fresh_rx.len() + self.used_rx.len()).min(self.shared.pool_size);
        let deadline = Instant::now() + STATS_DRAIN_BUDGET;
        let mut analyzed = Vec::new();
        for _ in 0..available {
            match self.fresh_rx.recv_deadline(deadline) {
                Ok(captcha) => analyzed.push(captcha),
                Err(_) => break,
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        let fresh = analyzed.len() + self.fresh_rx.len();
        let used = self.used_rx.len();
        let mut averages = InstanceAverages {
            analyzed: analyzed.len(),
            ..InstanceAverages::default()
        };
        for captcha in &analyzed {
            let stats = captcha.stats();
            averages.generation += stats.generation as f64;
            averages.average_font_size += stats.average_font_size;
            averages.colors_evaluated += stats.colors_evaluated as f64;
            averages.position_corrections += stats.position_corrections as f64;
            averages.image_data_size += stats.image_data_size as f64;
            averages.layers_of_noise += stats.layers_of_noise as f64;
        }
        let divisor = analyzed.len().max(1) as f64;
        averages.generation /= divisor;
        averages.average_font_size /= divisor;
        averages.colors_evaluated /= divisor;
        averages.position_corrections /= divisor;
        averages.image_data_size /= divisor;
        averages.layers_of_noise /= divisor;
        for captcha in analyzed {
            let _ = self.fresh_tx.send(captcha);
        }

        EngineStats {
            shut_down: false,
            uptime,
            pool_size: self.shared.pool_size,
            fresh,
            used,
            distributed,
            validation_attempts,
            solves,
            generations_per_hour: distributed as f64 / hours,
            validations_per_hour: validation_attempts as f64 / hours,
            solves_per_hour: solves as f64 / hours,
            instance_averages: averages,
            settings,
        }
    }

    fn ensure_running(&self) -> Result<(), Error> {
        if self.is_shut_down() {
            Err(Error::ShutDown)
        } else {
            Ok(())
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("pool_size", &self.shared.pool_size)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Fills the pool, then applies posted configuration updates by
/// draining both queues and re-rendering every instance.
fn generator_task(
    shared: Arc<SharedState>,
    fresh_tx: Sender<Captcha>,
    fresh_rx: Receiver<Captcha>,
    used_rx: Receiver<Captcha>,
    settings_rx: Receiver<Settings>,
    mut stop: StopSignal,
) {
    for _ in 0..shared.pool_size {
        if stop.seen() {
            return;
        }
        let settings = shared.current.lock().unwrap().clone();
        match Captcha::new(settings) {
            Ok(captcha) => {
                if fresh_tx.send(captcha).is_err() {
                    return;
                }
            }
            Err(err) => {
                error!("pool fill failed: {}", err);
                return;
            }
        }
    }
    debug!("pool filled with {} instances", shared.pool_size);

    'run: while !stop.seen() {
        thread::sleep(TICK);
        let new_settings = match settings_rx.try_recv() {
            Ok(settings) => settings,
            Err(_) => continue,
        };
        debug!("applying updated settings to the pool");
        let mut instances = Vec::with_capacity(shared.pool_size);
        for _ in 0..shared.pool_size {
            // prefer used instances so fresh ones keep serving `get`
            loop {
                if stop.seen() {
                    break 'run;
                }
                if let Ok(captcha) = used_rx.try_recv() {
                    instances.push(captcha);
                    break;
                }
                if let Ok(captcha) = fresh_rx.recv_timeout(Duration::from_millis(100)) {
                    instances.push(captcha);
                    break;
                }
            }
        }
        *shared.current.lock().unwrap() = new_settings.clone();
        for mut captcha in instances {
            if stop.seen() {
                break 'run;
            }
            match captcha.update_settings(new_settings.clone()) {
                Ok(()) => {
                    let _ = fresh_tx.send(captcha);
                }
                Err(err) => error!("reconfigured instance dropped from the pool: {}", err),
            }
        }
    }
}

/// Re-renders used instances back into the fresh queue, pacing itself
/// according to the configured rate limit.
fn refresher_task(
    shared: Arc<SharedState>,
    fresh_tx: Sender<Captcha>,
    used_rx: Receiver<Captcha>,
    mut stop: StopSignal,
) {
    'run: while !stop.seen() {
        let rate_limit = shared.current.lock().unwrap().rate_limit();
        let mut window_start = None;
        let batch = match rate_limit {
            RateLimit::Unlimited => shared.pool_size,
            RateLimit::PerMinute(per_minute) => {
                window_start = Some(Instant::now());
                per_minute as usize
            }
            RateLimit::SecsBetween(seconds) => {
                let whole = seconds as u64;
                for _ in 0..whole {
                    if stop.seen() {
                        break 'run;
                    }
                    thread::sleep(TICK);
                }
                let fraction = seconds.fract();
                if fraction > 0.0 {
                    thread::sleep(Duration::from_secs_f64(fraction));
                }
                1
            }
        };
        for _ in 0..batch {
            if stop.seen() {
                break 'run;
            }
            let mut captcha = match used_rx.recv_timeout(TICK) {
                Ok(captcha) => captcha,
                Err(_) => continue,
            };
            match captcha.generate() {
                Ok(()) => {
                    let _ = fresh_tx.send(captcha);
                }
                Err(err) => error!("refresh failed, instance dropped from the pool: {}", err),
            }
        }
        if let Some(start) = window_start {
            // spend the rest of the minute before the next batch
            loop {
                let elapsed = start.elapsed();
                if elapsed >= Duration::from_secs(60) {
                    break;
                }
                if stop.seen() {
                    break 'run;
                }
                thread::sleep(TICK.min(Duration::from_secs(60) - elapsed));
            }
        }
    }
}

/// Answers first-use queries against the consumed-token set and sweeps
/// expired entries out of it every [`SWEEP_TICKS`] seconds.
fn validator_task(
    shared: Arc<SharedState>,
    to_validate_rx: Receiver<String>,
    result_tx: Sender<bool>,
    mut stop: StopSignal,
) {
    let consumed: Arc<Mutex<FxHashSet<String>>> = Arc::default();
    let rpc_stop = Arc::new(AtomicBool::new(false));

    let rpc = {
        let consumed = Arc::clone(&consumed);
        let rpc_stop = Arc::clone(&rpc_stop);
        thread::Builder::new()
            .name("captcha-validator-rpc".into())
            .spawn(move || {
                while !rpc_stop.load(Ordering::Relaxed) {
                    let token = match to_validate_rx.recv_timeout(TICK) {
                        Ok(token) => token,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };
                    let first_use = consumed.lock().unwrap().insert(token);
                    let mut reply = first_use;
                    loop {
                        match result_tx.send_timeout(reply, TICK) {
                            Ok(()) => break,
                            Err(SendTimeoutError::Timeout(value)) => {
                                if rpc_stop.load(Ordering::Relaxed) {
                                    break;
                                }
                                reply = value;
                            }
                            Err(SendTimeoutError::Disconnected(_)) => break,
                        }
                    }
                }
            })
    };
    let rpc = match rpc {
        Ok(handle) => handle,
        Err(err) => {
            error!("validator rpc thread failed to start: {}", err);
            return;
        }
    };

    'sweep: loop {
        for _ in 0..SWEEP_TICKS {
            if stop.seen() {
                break 'sweep;
            }
            thread::sleep(TICK);
        }
        let lifetime = shared.current.lock().unwrap().lifetime_secs();
        let mut set = consumed.lock().unwrap();
        let before = set.len();
        set.retain(|token| !shared.codec.is_expired(token, lifetime));
        if set.len() != before {
            debug!("swept {} expired token(s)", before - set.len());
        }
    }

    rpc_stop.store(true, Ordering::Relaxed);
    let _ = rpc.join();
}

/// Point-in-time engine report; see [`Engine::stats`].
#[derive(Clone, Debug)]
pub struct EngineStats {
    pub shut_down: bool,
    pub uptime: Duration,
    pub pool_size: usize,
    /// Fresh instances waiting in the pool.
    pub fresh: usize,
    /// Consumed instances waiting for a refresh.
    pub used: usize,
    /// CAPTCHAs handed out.
    pub distributed: u64,
    pub validation_attempts: u64,
    /// Validations that returned `true`.
    pub solves: u64,
    pub generations_per_hour: f64,
    pub validations_per_hour: f64,
    pub solves_per_hour: f64,
    pub instance_averages: InstanceAverages,
    pub settings: Settings,
}

/// Counters averaged over the fresh instances sampled by
/// [`Engine::stats`].
#[derive(Clone, Debug, Default)]
pub struct InstanceAverages {
    /// Instances the averages were computed from.
    pub analyzed: usize,
    pub generation: f64,
    pub average_font_size: f64,
    pub colors_evaluated: f64,
    pub position_corrections: f64,
    pub image_data_size: f64,
    pub layers_of_noise: f64,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CAPTCHA ENGINE")?;
        writeln!(f)?;
        writeln!(f, "    Shut Down: {}", if self.shut_down { "Yes" } else { "No" })?;
        let total = self.uptime.as_secs();
        writeln!(
            f,
            "    Active: {} days, {} hours, {} minutes, and {} seconds",
            total / 86_400,
            total % 86_400 / 3_600,
            total % 3_600 / 60,
            total % 60
        )?;
        writeln!(f)?;
        writeln!(f, "    Pool Size: {}", if self.shut_down { 0 } else { self.pool_size })?;
        writeln!(f, "    Fresh CAPTCHAs in Pool: {}", self.fresh)?;
        writeln!(f, "    Used CAPTCHAs in Pool: {}", self.used)?;
        writeln!(f)?;
        writeln!(f, "    CAPTCHAs Distributed: {}", self.distributed)?;
        writeln!(f, "    Validation Attempts: {}", self.validation_attempts)?;
        writeln!(f, "    CAPTCHA Solves: {}", self.solves)?;
        writeln!(f)?;
        writeln!(f, "    CAPTCHAs Generated per Hour: {:.2}", self.generations_per_hour)?;
        writeln!(f, "    Validation Attempts per Hour: {:.2}", self.validations_per_hour)?;
        writeln!(f, "    CAPTCHA Solves per Hour: {:.2}", self.solves_per_hour)?;
        writeln!(f)?;
        let averages = &self.instance_averages;
        writeln!(
            f,
            "    Average Stats per Captcha Instance ({} Analyzed):",
            averages.analyzed
        )?;
        writeln!(f, "        CAPTCHAs Generated: {:.2}", averages.generation)?;
        writeln!(f, "        Font Size per Character: {:.2}", averages.average_font_size)?;
        writeln!(f, "        Character Colors Evaluated: {:.2}", averages.colors_evaluated)?;
        writeln!(
            f,
            "        Corrections to Character Positions: {:.2}",
            averages.position_corrections
        )?;
        writeln!(f, "        Image Data Size (In Bytes): {:.2}", averages.image_data_size)?;
        writeln!(f, "        Layers of Noise Applied: {:.2}", averages.layers_of_noise)?;
        writeln!(f)?;
        writeln!(f, "    Settings:")?;
        for line in self.settings.to_string().lines() {
            writeln!(f, "    {}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod engine_test {
    use super::*;
    use crate::settings::DEFAULT_FONTS;

    fn small_builder() -> crate::settings::SettingsBuilder {
        Settings::builder()
            .width(160)
            .height(60)
            .fonts(vec![DEFAULT_FONTS[0]])
            .max_noise(4)
            .text("mill42")
            .pool_size(2)
    }

    fn engine(builder: crate::settings::SettingsBuilder) -> Engine {
        let _ = env_logger::builder().is_test(true).try_init();
        Engine::new(builder.build().unwrap()).unwrap()
    }

    #[test]
    fn issued_challenges_decode_and_validate_once() {
        let engine = engine(small_builder());
        let challenge = engine.get().unwrap();

        let decoded = image::load_from_memory(&challenge.blob).unwrap().into_rgb8();
        assert_eq!((decoded.width(), decoded.height()), (160, 60));
        assert_eq!(
            image::guess_format(&challenge.blob).unwrap(),
            image::ImageFormat::Png
        );

        assert!(engine.validate(&challenge.token, "mill42").unwrap());
        // the first success consumed the token
        assert!(!engine.validate(&challenge.token, "mill42").unwrap());
        assert!(!engine.validate(&challenge.token, "MILL42").unwrap());
    }

    #[test]
    fn get_and_save_also_writes_to_disk() {
        let engine = engine(small_builder());
        let path = std::env::temp_dir().join(format!(
            "captcha_mill_engine_{}.png",
            std::process::id()
        ));
        let challenge = engine.get_and_save(&path).unwrap();
        let written = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(written, challenge.blob);
    }

    #[test]
    fn wrong_answers_do_not_consume_the_token() {
        let engine = engine(small_builder());
        let challenge = engine.get().unwrap();
        assert!(!engine.validate(&challenge.token, "nope42").unwrap());
        assert!(engine.validate(&challenge.token, "mill42").unwrap());
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let engine = engine(small_builder());
        assert!(!engine.validate("not-a-token", "mill42").unwrap());
    }

    #[test]
    fn answers_fold_case_by_default() {
        let engine = engine(small_builder().text("hello"));
        let challenge = engine.get().unwrap();
        assert!(engine.validate(&challenge.token, "HELLO").unwrap());
    }

    #[test]
    fn case_sensitive_answers_must_match_exactly() {
        let engine = engine(small_builder().text("Hello").case_sensitive(true));
        let challenge = engine.get().unwrap();
        assert!(!engine.validate(&challenge.token, "hello").unwrap());
        // the mismatch above must not have consumed the token
        assert!(engine.validate(&challenge.token, "Hello").unwrap());
    }

    #[test]
    fn expired_tokens_fail_even_with_the_right_answer() {
        let engine = engine(small_builder().lifetime_secs(1));
        let challenge = engine.get().unwrap();
        thread::sleep(Duration::from_millis(2100));
        assert!(!engine.validate(&challenge.token, "mill42").unwrap());
    }

    #[test]
    fn fractional_rate_limit_paces_refreshes() {
        let engine = engine(
            small_builder()
                .pool_size(1)
                .rate_limit(RateLimit::SecsBetween(2.5)),
        );
        let _first = engine.get().unwrap();
        let _second = engine.get().unwrap();
        let start = Instant::now();
        let _third = engine.get().unwrap();
        assert!(
            start.elapsed() >= Duration::from_secs(1),
            "third challenge arrived after only {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn pool_size_cannot_be_reconfigured() {
        let engine = engine(small_builder());
        let bigger_pool = engine.settings().to_builder().pool_size(3).build().unwrap();
        let err = engine.reconfigure(bigger_pool).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { setting: "pool_size", .. }));
    }

    #[test]
    fn reconfigured_settings_reach_new_challenges() {
        let engine = engine(small_builder().text("alpha"));
        let replacement = engine.settings().to_builder().text("bravo7").build().unwrap();
        engine.reconfigure(replacement).unwrap();

        let deadline = Instant::now() + Duration::from_secs(30);
        let mut switched = false;
        while Instant::now() < deadline {
            let challenge = engine.get().unwrap();
            if engine.validate(&challenge.token, "bravo7").unwrap() {
                switched = true;
                break;
            }
            thread::sleep(Duration::from_millis(200));
        }
        assert!(switched, "pool never produced a challenge under the new settings");
        assert_eq!(engine.settings().text(), "bravo7");
    }

    #[test]
    fn shutdown_is_terminal() {
        let engine = engine(small_builder());
        let challenge = engine.get().unwrap();
        engine.shutdown().unwrap();

        assert!(engine.is_shut_down());
        assert!(matches!(engine.shutdown(), Err(Error::ShutDown)));
        assert!(matches!(engine.get(), Err(Error::ShutDown)));
        assert!(matches!(
            engine.validate(&challenge.token, "mill42"),
            Err(Error::ShutDown)
        ));
        assert!(matches!(
            engine.reconfigure(engine.settings()),
            Err(Error::ShutDown)
        ));

        let stats = engine.stats();
        assert!(stats.shut_down);
        assert_eq!(stats.fresh, 0);
        assert_eq!(stats.used, 0);
        assert_eq!(stats.distributed, 1);
    }

    #[test]
    fn blocked_gets_fail_cleanly_on_shutdown() {
        let engine = Arc::new(engine(
            small_builder()
                .pool_size(1)
                .rate_limit(RateLimit::SecsBetween(30.0)),
        ));
        let _held = engine.get().unwrap();
        let blocked = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.get())
        };
        thread::sleep(Duration::from_millis(500));
        engine.shutdown().unwrap();
        let result = blocked.join().unwrap();
        assert!(matches!(result, Err(Error::ShutDown)));
    }

    #[test]
    fn stats_reflect_activity() {
        let engine = engine(small_builder());
        let challenge = engine.get().unwrap();
        assert!(engine.validate(&challenge.token, "mill42").unwrap());
        assert!(!engine.validate(&challenge.token, "mill42").unwrap());

        let stats = engine.stats();
        assert!(!stats.shut_down);
        assert_eq!(stats.distributed, 1);
        assert_eq!(stats.validation_attempts, 2);
        assert_eq!(stats.solves, 1);
        assert_eq!(stats.pool_size, 2);
        assert!(stats.generations_per_hour > 0.0);
        assert!(stats.instance_averages.analyzed >= 1);
        assert!(stats.instance_averages.image_data_size > 0.0);
        let report = stats.to_string();
        assert!(report.contains("CAPTCHAs Distributed: 1"));
    }
}
