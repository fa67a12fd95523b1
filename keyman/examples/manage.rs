//! Key manager walkthrough on a virtual bio key
//!
//! Plays the role of the UI shell: lists keys, shows getInfo, sets a PIN,
//! enrolls a fingerprint and finally factory-resets the key. A background
//! thread stands in for the operator touching the sensor and re-plugging the
//! key.
//!
//! ```bash
//! RUST_LOG=keyman=debug cargo run --example manage
//! ```

use keyman::{EnrollmentEvent, KeyManager, ManagerConfig, ResetProgress, Result};
use keyman_virtual::{VirtualConfig, VirtualDriver};

use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

const KEY_PATH: &str = "/dev/hidraw0";
const PIN: &str = "123456";

static INIT: OnceLock<()> = OnceLock::new();

fn init_tracing() {
    let _ = INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(env_filter)
            .try_init();
    });
}

fn main() -> Result<()> {
    init_tracing();

    let driver = Arc::new(VirtualDriver::new());
    driver.plug(
        KEY_PATH,
        VirtualConfig::builder()
            .product("Virtual Bio Key")
            .bio(true)
            .samples_required(3)
            .build(),
    );

    let config = ManagerConfig::builder()
        .tick_interval(Duration::from_millis(200))
        .build();
    let mut manager = KeyManager::with_config(Arc::clone(&driver), config);

    println!("Devices:");
    for (index, device) in manager.discover()?.iter().enumerate() {
        println!("  [{index}] {} ({})", device.label(), device.path);
    }

    let info = manager.select_device(0)?;
    println!("\n{info}\n");

    manager.set_or_change_pin(PIN, None)?;
    println!("PIN set: {}", manager.has_pin()?);

    if manager.supports_biometric()? {
        enroll(&driver, &mut manager)?;
    }

    reset(&driver, &mut manager)?;
    println!("PIN set after reset: {}", manager.has_pin()?);
    Ok(())
}

fn enroll(driver: &Arc<VirtualDriver>, manager: &mut KeyManager<VirtualDriver>) -> Result<()> {
    let handle = manager.start_enrollment(PIN)?;
    println!("\nTouch the sensor...");

    let operator = {
        let driver = Arc::clone(driver);
        thread::spawn(move || {
            for _ in 0..3 {
                thread::sleep(Duration::from_millis(300));
                driver.touch();
            }
        })
    };

    for event in handle.events() {
        match event {
            EnrollmentEvent::TouchNeeded {
                remaining,
                feedback,
            } => println!("  {feedback}, {remaining} more"),
            EnrollmentEvent::NameRequested => handle.supply_name("Right index")?,
            EnrollmentEvent::Done(template) => {
                println!("Enrolled {} as \"{}\"", template.id, template.name);
                break;
            }
            EnrollmentEvent::Canceled => {
                println!("Enrollment canceled");
                break;
            }
            EnrollmentEvent::Failed(err) => {
                println!("Enrollment failed: {err}");
                break;
            }
        }
    }
    let _ = operator.join();

    for (id, name) in manager.list_templates(PIN)? {
        println!("  template {id}: {name}");
    }
    Ok(())
}

fn reset(driver: &Arc<VirtualDriver>, manager: &mut KeyManager<VirtualDriver>) -> Result<()> {
    let Some(target) = manager.session().map(|s| s.path().clone()) else {
        return Ok(());
    };
    manager.arm_reset(&target)?;
    println!("\nUnplug the key, then plug it back in...");

    let operator = {
        let driver = Arc::clone(driver);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(1));
            driver.unplug(KEY_PATH);
            thread::sleep(Duration::from_secs(1));
            driver.replug(KEY_PATH);
        })
    };

    let interval = manager.config().tick_interval;
    loop {
        match manager.tick_reset(Instant::now()) {
            ResetProgress::AwaitingDisconnect { remaining } => {
                println!("  waiting for unplug ({}s left)", remaining.as_secs())
            }
            ResetProgress::DisconnectObserved => println!("  key unplugged"),
            ResetProgress::AwaitingReconnect { remaining } => {
                println!("  waiting for re-plug ({}s left)", remaining.as_secs())
            }
            ResetProgress::Succeeded => {
                println!("Factory reset complete");
                break;
            }
            ResetProgress::TimedOut(err) | ResetProgress::Failed(err) => {
                println!("Factory reset did not complete: {err}");
                break;
            }
            ResetProgress::Inactive(_) => break,
        }
        thread::sleep(interval);
    }
    let _ = operator.join();
    Ok(())
}
