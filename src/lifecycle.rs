//! Leaf lifecycle: init, start, stop and sleep fan-out.
//!
//! Failures are contained per leaf.  A failed init leaves that leaf
//! registered but never ready; the boot sequence carries on with the next
//! one.  `running` implies `ready` at every point.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::leaf::Leaf;
use crate::registry::Registry;

impl Registry {
    /// Register `leaf` and run its class's init callback.
    pub fn sys_init(&self, leaf: &Arc<Leaf>) -> Result<()> {
        debug!("sys_init {}", leaf.name());
        info!("NOTICE >INIT {}/{}", leaf.class().name(), leaf.name());
        self.register_leaf(leaf);
        leaf.set_running(false);
        leaf.set_ready(false);

        match leaf.class().callbacks().init(leaf, self) {
            Ok(()) => {
                info!("NOTICE <READY {}", leaf.name());
                leaf.set_ready(true);
                Ok(())
            }
            Err(e) => {
                warn!("INIT RESULT {} rc={} ({})", leaf.name(), e.errno(), e);
                Err(e)
            }
        }
    }

    /// Run the start callback of a ready leaf.
    pub fn sys_start(&self, leaf: &Arc<Leaf>) -> Result<()> {
        debug!("sys_start {}", leaf.name());
        if !leaf.is_ready() {
            return Err(Error::NotReady);
        }
        info!("NOTICE >START {}/{}", leaf.class().name(), leaf.name());
        match leaf.class().callbacks().start(leaf, self) {
            Ok(()) => {
                leaf.set_running(true);
                info!("NOTICE <STARTED {}", leaf.name());
                Ok(())
            }
            Err(e) => {
                warn!("START RESULT {} rc={} ({})", leaf.name(), e.errno(), e);
                Err(e)
            }
        }
    }

    /// Start a registered leaf by name.
    pub fn start(&self, name: &str) -> Result<()> {
        let leaf = self.find_leaf(name).ok_or(Error::NotFound)?;
        if !leaf.is_ready() {
            warn!("{} was never ready, not starting", name);
            return Err(Error::NotReady);
        }
        self.sys_start(&leaf)
    }

    /// Stop a registered leaf by name.
    pub fn stop(&self, name: &str) -> Result<()> {
        let leaf = self.find_leaf(name).ok_or(Error::NotFound)?;
        leaf.class().callbacks().stop(&leaf, self)?;
        leaf.set_running(false);
        info!("NOTICE <STOPPED {}", name);
        Ok(())
    }

    /// Notify every leaf of imminent sleep.  All leaves are visited; the
    /// last failure is returned.
    pub fn pre_sleep(&self) -> Result<()> {
        self.fan_out("pre_sleep", |leaf| leaf.class().callbacks().pre_sleep(leaf, self))
    }

    /// Notify every leaf of wake-up.  All leaves are visited; the last
    /// failure is returned.
    pub fn post_sleep(&self) -> Result<()> {
        self.fan_out("post_sleep", |leaf| leaf.class().callbacks().post_sleep(leaf, self))
    }

    fn fan_out(&self, phase: &str, f: impl Fn(&Arc<Leaf>) -> Result<()>) -> Result<()> {
        let mut rc = Ok(());
        for leaf in self.leaves() {
            if let Err(e) = f(&leaf) {
                warn!("{} {} failed: {}", phase, leaf.name(), e);
                rc = Err(e);
            }
        }
        rc
    }

    /// False for unknown names.
    pub fn leaf_is_ready(&self, name: &str) -> bool {
        self.find_leaf(name).is_some_and(|l| l.is_ready())
    }

    /// False for unknown names.
    pub fn leaf_is_running(&self, name: &str) -> bool {
        self.find_leaf(name).is_some_and(|l| l.is_running())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::{LeafCallbacks, LeafClass, NoCallbacks};

    struct Failing {
        init: Option<Error>,
        start: Option<Error>,
        sleep: Option<Error>,
    }

    impl LeafCallbacks for Failing {
        fn init(&self, _: &Arc<Leaf>, _: &Registry) -> Result<()> {
            self.init.map_or(Ok(()), Err)
        }

        fn start(&self, _: &Arc<Leaf>, _: &Registry) -> Result<()> {
            self.start.map_or(Ok(()), Err)
        }

        fn pre_sleep(&self, _: &Arc<Leaf>, _: &Registry) -> Result<()> {
            self.sleep.map_or(Ok(()), Err)
        }
    }

    #[test]
    fn init_then_start() {
        let r = Registry::default();
        let leaf = Leaf::new("led0", &LeafClass::new("led", NoCallbacks));
        r.sys_init(&leaf).unwrap();
        assert!(r.leaf_is_ready("led0"));
        assert!(!r.leaf_is_running("led0"));
        r.sys_start(&leaf).unwrap();
        assert!(r.leaf_is_running("led0"));
        r.stop("led0").unwrap();
        assert!(r.leaf_is_ready("led0"));
        assert!(!r.leaf_is_running("led0"));
    }

    #[test]
    fn failed_init_blocks_start() {
        let r = Registry::default();
        let class = LeafClass::new(
            "kp",
            Failing {
                init: Some(Error::DeviceUnavailable),
                start: None,
                sleep: None,
            },
        );
        let leaf = Leaf::new("kp0", &class);
        assert_eq!(r.sys_init(&leaf), Err(Error::DeviceUnavailable));
        assert!(r.find_leaf("kp0").is_some(), "failed leaf stays registered");
        assert_eq!(r.sys_start(&leaf), Err(Error::NotReady));
        assert_eq!(r.start("kp0"), Err(Error::NotReady));
        assert!(!r.leaf_is_running("kp0"));
    }

    #[test]
    fn failed_start_leaves_ready() {
        let r = Registry::default();
        let class = LeafClass::new(
            "x",
            Failing {
                init: None,
                start: Some(Error::Io),
                sleep: None,
            },
        );
        let leaf = Leaf::new("x0", &class);
        r.sys_init(&leaf).unwrap();
        assert_eq!(r.sys_start(&leaf), Err(Error::Io));
        assert!(r.leaf_is_ready("x0"));
        assert!(!r.leaf_is_running("x0"));
    }

    #[test]
    fn unknown_names() {
        let r = Registry::default();
        assert_eq!(r.start("nope"), Err(Error::NotFound));
        assert_eq!(r.stop("nope"), Err(Error::NotFound));
        assert!(!r.leaf_is_ready("nope"));
        assert!(!r.leaf_is_running("nope"));
    }

    #[test]
    fn sleep_visits_all_and_returns_last_error() {
        let r = Registry::default();
        let mk = |name: &str, err| {
            let class = LeafClass::new(
                name,
                Failing {
                    init: None,
                    start: None,
                    sleep: err,
                },
            );
            Leaf::new(name, &class)
        };
        for leaf in [
            mk("a", Some(Error::Io)),
            mk("b", None),
            mk("c", Some(Error::DeviceUnavailable)),
        ] {
            r.sys_init(&leaf).unwrap();
        }
        assert_eq!(r.pre_sleep(), Err(Error::DeviceUnavailable));
        assert_eq!(r.post_sleep(), Ok(()));
    }

    mod notices {
        use std::cell::RefCell;
        use std::sync::Once;

        struct Capture;

        thread_local! {
            static LINES: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
        }

        impl log::Log for Capture {
            fn enabled(&self, _: &log::Metadata<'_>) -> bool {
                true
            }

            fn log(&self, record: &log::Record<'_>) {
                LINES.with(|l| l.borrow_mut().push(record.args().to_string()));
            }

            fn flush(&self) {}
        }

        static CAPTURE: Capture = Capture;
        static INSTALL: Once = Once::new();

        /// Run `f` and return the notice lines it logged on this thread.
        pub fn collect(f: impl FnOnce()) -> Vec<String> {
            INSTALL.call_once(|| {
                if log::set_logger(&CAPTURE).is_ok() {
                    log::set_max_level(log::LevelFilter::Trace);
                }
            });
            LINES.with(|l| l.borrow_mut().clear());
            f();
            LINES.with(|l| l.borrow_mut().drain(..).filter(|line| line.starts_with("NOTICE")).collect())
        }
    }

    #[test]
    fn start_by_name_logs_like_sys_start() {
        let r = Registry::default();
        let class = LeafClass::new("led", NoCallbacks);
        let a = Leaf::new("led0", &class);
        let b = Leaf::new("led1", &class);
        r.sys_init(&a).unwrap();
        r.sys_init(&b).unwrap();

        let direct = notices::collect(|| r.sys_start(&a).unwrap());
        let by_name = notices::collect(|| r.start("led1").unwrap());
        assert_eq!(direct, ["NOTICE >START led/led0", "NOTICE <STARTED led0"]);
        assert_eq!(by_name, ["NOTICE >START led/led1", "NOTICE <STARTED led1"]);
    }
}
