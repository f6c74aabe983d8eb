// VoltWatch — Firmware Entry Point
//
// Boot sequence:
//   1. Start logging and the task watchdog.
//   2. Open the capture partition and validate the slot geometry.
//   3. Claim the converter and start timer-paced acquisition.
//   4. Spawn the acquisition task (sampling, filtering, capture, storage)
//      and the presentation task (status from the shared metrics).
//
// A converter or storage failure at boot is fatal: it is logged and main
// returns the error; nothing is retried.
//
// On a hosted OS the same tasks run against simulated peripherals for a
// short, bounded session and the process exits.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use voltwatch::acquisition::AcquisitionEngine;
use voltwatch::collector::CollectionController;
use voltwatch::config::*;
use voltwatch::lockout::Lockout;
use voltwatch::storage::CaptureStore;
use voltwatch::tasks::acquisition::{acquisition_task, AcquisitionTask};
use voltwatch::tasks::presentation::{presentation_task, LogPresenter};
use voltwatch::{commands, shared};

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------
#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use voltwatch::drivers::adc::AdcConverter;
    use voltwatch::drivers::partition::PartitionFlash;
    use voltwatch::drivers::twdt::TaskWatchdog;

    // Link esp-idf-sys runtime patches and initialise logging.
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    log::info!("VoltWatch firmware starting…");

    let watchdog = Arc::new(TaskWatchdog::new(WATCHDOG_TIMEOUT_MS));
    let lockout = Lockout::new();
    let running = Arc::new(AtomicBool::new(true));

    // ---- Capture store ----------------------------------------------------
    let storage = StorageConfig::default();
    let flash = PartitionFlash::open(CAPTURE_PARTITION, FLASH_PROGRAM_SIZE)?;
    let store = CaptureStore::new(flash, Arc::clone(&watchdog), Arc::clone(&lockout), storage);
    store.init()?;
    let collector = CollectionController::new(store, storage.sample_rate_hz);

    // ---- Acquisition ------------------------------------------------------
    let mut engine = AcquisitionEngine::new(AdcConverter::new()?, AcquisitionConfig::default());
    engine.init()?;
    engine.start()?;

    // ---- Channels ---------------------------------------------------------
    let (metrics_tx, metrics_rx) = shared::channel();
    // The host link owns the sender; until it is attached nothing submits.
    let (_command_tx, command_rx) = commands::channel();

    let victim = lockout
        .victim()
        .ok_or_else(|| anyhow::anyhow!("presentation lockout already taken"))?;

    // ---- Spawn tasks (map to FreeRTOS tasks via std::thread) ---------------
    let ui_watchdog = Arc::clone(&watchdog);
    let ui_running = Arc::clone(&running);
    thread::Builder::new()
        .name("present".into())
        .stack_size(STACK_PRESENTATION)
        .spawn(move || {
            presentation_task(metrics_rx, victim, ui_watchdog, LogPresenter::default(), ui_running);
        })?;

    let task = AcquisitionTask::new(
        engine,
        FilterConfig::default(),
        Calibration::default(),
        collector,
        metrics_tx,
        command_rx,
        watchdog,
    );
    let acq_running = Arc::clone(&running);
    thread::Builder::new()
        .name("acquire".into())
        .stack_size(STACK_ACQUISITION)
        .spawn(move || {
            acquisition_task(task, acq_running);
        })?;

    // Main thread has nothing left to do — park it forever.
    // (All work happens in the spawned FreeRTOS tasks.)
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

// ---------------------------------------------------------------------------
// Hosted simulation
// ---------------------------------------------------------------------------
#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    use std::sync::atomic::Ordering;

    use voltwatch::commands::{Command, Response};
    use voltwatch::drivers::sim::{SimulatedConverter, Waveform};
    use voltwatch::storage::RamFlash;
    use voltwatch::watchdog::SoftWatchdog;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("VoltWatch simulation starting…");

    let watchdog = Arc::new(SoftWatchdog::new(Duration::from_millis(
        u64::from(WATCHDOG_TIMEOUT_MS),
    )));
    let lockout = Lockout::new();
    let running = Arc::new(AtomicBool::new(true));

    let storage = StorageConfig::default();
    let flash = RamFlash::new(storage.region_size(), FLASH_ERASE_SIZE, FLASH_PROGRAM_SIZE);
    let store = CaptureStore::new(flash, Arc::clone(&watchdog), Arc::clone(&lockout), storage);
    store.init()?;
    let collector = CollectionController::new(store, storage.sample_rate_hz);

    let mut engine = AcquisitionEngine::new(
        SimulatedConverter::new(Waveform::default()),
        AcquisitionConfig::default(),
    );
    engine.init()?;
    engine.start()?;

    let (metrics_tx, metrics_rx) = shared::channel();
    let (command_tx, command_rx) = commands::channel();
    let victim = lockout
        .victim()
        .ok_or_else(|| anyhow::anyhow!("presentation lockout already taken"))?;

    let ui_watchdog = Arc::clone(&watchdog);
    let ui_running = Arc::clone(&running);
    let presenter = thread::Builder::new()
        .name("present".into())
        .spawn(move || {
            presentation_task(metrics_rx, victim, ui_watchdog, LogPresenter::default(), ui_running);
        })?;

    let task = AcquisitionTask::new(
        engine,
        FilterConfig::default(),
        Calibration::default(),
        collector,
        metrics_tx,
        command_rx,
        Arc::clone(&watchdog),
    );
    let acq_running = Arc::clone(&running);
    let acquirer = thread::Builder::new()
        .name("acquire".into())
        .spawn(move || {
            acquisition_task(task, acq_running);
        })?;

    // ---- Demo session: what a host would do over the control link ---------
    let timeout = Duration::from_secs(2);
    let outcome = (|| -> anyhow::Result<()> {
        log::info!("→ {:?}", command_tx.call(Command::Collect { seconds: 1 }, timeout)?);

        let mut slot = None;
        for _ in 0..50 {
            thread::sleep(Duration::from_millis(100));
            if let Response::Status {
                last_slot: Some(s), ..
            } = command_tx.call(Command::Status, timeout)?
            {
                slot = Some(s);
                break;
            }
        }
        let slot = slot.ok_or_else(|| anyhow::anyhow!("capture did not complete"))?;

        if let Response::Slots(slots) = command_tx.call(Command::List, timeout)? {
            for s in &slots {
                log::info!(
                    "slot {}: {} samples, t={} ms, v{}{}",
                    s.index,
                    s.sample_count,
                    s.timestamp,
                    s.version,
                    if s.has_derived { " +filtered" } else { "" }
                );
            }
        }
        if let Response::Capture {
            bytes: Some(bytes), ..
        } = command_tx.call(Command::Fetch { slot }, timeout)?
        {
            log::info!("Fetched slot {}: {} bytes", slot, bytes.len());
        }
        log::info!("→ {:?}", command_tx.call(Command::Delete { slot }, timeout)?);
        log::info!("→ {:?}", command_tx.call(Command::Stats, timeout)?);
        Ok(())
    })();

    running.store(false, Ordering::SeqCst);
    if acquirer.join().is_err() || presenter.join().is_err() {
        anyhow::bail!("task panicked");
    }
    if watchdog.expired() {
        log::warn!("Watchdog would have fired");
    }
    outcome?;
    log::info!("Simulation finished");
    Ok(())
}
