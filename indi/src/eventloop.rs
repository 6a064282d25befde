//! Driver main loop
//!
//! A reader task parses the client stream into elements and hands them over
//! a channel. The loop itself runs on one task: each pass fires due timers,
//! dispatches the next element, or runs one work proc when neither is
//! ready. Driver callbacks are never re-entered.

use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::context::IndiContext;
use crate::dispatcher::{Dispatcher, Driver};
use crate::error::{IndiError, IndiResult};
use crate::xml::{ElementReader, XmlElement};

/// Elements buffered between the reader task and the loop.
const INBOUND_QUEUE: usize = 64;

async fn read_elements<R>(input: R, tx: mpsc::Sender<IndiResult<XmlElement>>)
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = ElementReader::new(input);
    loop {
        let next = match reader.next_element().await {
            Ok(Some(element)) => Ok(element),
            Ok(None) => Err(IndiError::Eof),
            Err(e) => Err(e),
        };
        let done = next.is_err();
        if tx.send(next).await.is_err() || done {
            return;
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn report(err: &IndiError) {
    match err.device() {
        Some(device) => tracing::warn!("{}: {}", device, err),
        None => tracing::warn!("{}", err),
    }
}

/// Serve `driver` until the input fails.
///
/// Returns only with a fatal error: end of input, a parse error that
/// leaves the stream out of sync, or a rejected protocol version.
pub async fn run<D, R>(
    ctx: &IndiContext,
    driver: &mut D,
    input: R,
    dispatcher: &Dispatcher,
) -> IndiResult<()>
where
    D: Driver + ?Sized,
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(INBOUND_QUEUE);
    let reader = tokio::spawn(read_elements(input, tx));

    let result = loop {
        let deadline = ctx.next_timer_deadline();
        let idle_work = ctx.has_work_procs();
        tokio::select! {
            biased;

            _ = wait_for(deadline) => {
                for id in ctx.take_due_timers(Instant::now()) {
                    if let Err(e) = driver.timer_fired(ctx, id) {
                        report(&e);
                    }
                }
            }
            inbound = rx.recv() => {
                let element = match inbound {
                    Some(Ok(element)) => element,
                    Some(Err(e)) => break Err(e),
                    None => break Err(IndiError::Eof),
                };
                if let Err(e) = dispatcher.dispatch(ctx, driver, &element) {
                    if e.is_fatal() {
                        break Err(e);
                    }
                    report(&e);
                }
            }
            // Lets the reader task run before idle work is taken.
            _ = tokio::task::yield_now(), if idle_work => {
                if let Some(id) = ctx.next_work_proc() {
                    if let Err(e) = driver.work_proc(ctx, id) {
                        report(&e);
                    }
                }
            }
        }
    };

    reader.abort();
    if let Err(e) = &result {
        tracing::error!("Driver loop stopped: {}", e);
    }
    result
}

/// [`run`] over the process's stdin.
pub async fn run_stdio<D: Driver + ?Sized>(
    ctx: &IndiContext,
    driver: &mut D,
    dispatcher: &Dispatcher,
) -> IndiResult<()> {
    run(ctx, driver, BufReader::new(tokio::io::stdin()), dispatcher).await
}

/// Give up setuid/setgid privileges before serving clients.
pub fn drop_privileges() -> IndiResult<()> {
    use nix::unistd::{geteuid, getgid, getuid, setgid, setuid};

    setgid(getgid()).map_err(|e| IndiError::Privileges(format!("setgid: {}", e)))?;
    setuid(getuid()).map_err(|e| IndiError::Privileges(format!("setuid: {}", e)))?;
    if geteuid() != getuid() {
        return Err(IndiError::Privileges(
            "effective user id still differs from real user id".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use crate::context::SharedBuffer;
    use crate::property::{shared, Light, LightVector};
    use crate::protocol::PropertyState;
    use crate::timer::{TimerId, WorkProcId};

    #[derive(Default)]
    struct Sensor {
        gets: usize,
        fired: Vec<TimerId>,
        work: Option<WorkProcId>,
        work_runs: usize,
    }

    impl Driver for Sensor {
        fn get_properties(&mut self, ctx: &IndiContext, _device: Option<&str>) -> IndiResult<()> {
            self.gets += 1;
            let status = shared(LightVector::new(
                "Sensor",
                "STATUS",
                "Status",
                "Main",
                PropertyState::Ok,
                vec![Light::new("READY", "Ready", PropertyState::Ok)],
            ));
            ctx.def_light(&status, None)
        }

        fn timer_fired(&mut self, _ctx: &IndiContext, id: TimerId) -> IndiResult<()> {
            self.fired.push(id);
            Err(IndiError::Config("poll failed".to_string()))
        }

        fn work_proc(&mut self, ctx: &IndiContext, id: WorkProcId) -> IndiResult<()> {
            assert_eq!(Some(id), self.work);
            self.work_runs += 1;
            if self.work_runs == 3 {
                ctx.remove_work_proc(id);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_eof_stops_loop() {
        let buf = SharedBuffer::new();
        let ctx = IndiContext::new(buf.clone());
        let mut driver = Sensor::default();
        let input: &'static [u8] = b"<getProperties version='1.7'/>\n\
            <newNumberVector device='Sensor' name='NOPE'><oneNumber name='X'>1</oneNumber></newNumberVector>\n";

        let err = run(&ctx, &mut driver, BufReader::new(input), &Dispatcher::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IndiError::Eof));
        assert!(err.is_fatal());
        assert_eq!(driver.gets, 1);
        assert!(buf.contents().contains("<defLightVector device='Sensor' name='STATUS'"));
    }

    #[tokio::test]
    async fn test_malformed_input_is_fatal() {
        let ctx = IndiContext::new(SharedBuffer::new());
        let mut driver = Sensor::default();
        let input: &'static [u8] = b"<getProperties version='1.7'></wrong>";
        let err = run(&ctx, &mut driver, BufReader::new(input), &Dispatcher::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IndiError::ParseError(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_newer_client_version_is_fatal() {
        let ctx = IndiContext::new(SharedBuffer::new());
        let mut driver = Sensor::default();
        let input: &'static [u8] = b"<getProperties version='9.9'/><getProperties version='1.7'/>";
        let err = run(&ctx, &mut driver, BufReader::new(input), &Dispatcher::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IndiError::VersionMismatch { .. }));
        assert_eq!(driver.gets, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_fire_between_messages() {
        let ctx = IndiContext::new(SharedBuffer::new());
        let mut driver = Sensor::default();
        let poll = ctx.add_periodic_timer(Duration::from_secs(1));
        let once = ctx.add_timer(Duration::from_millis(1500));

        let (client, server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let mut client = client;
            tokio::time::sleep(Duration::from_millis(3500)).await;
            let _ = client.write_all(b"<getProperties version='1.7'/>").await;
            // dropping the client closes the stream
        });

        let err = run(&ctx, &mut driver, BufReader::new(server), &Dispatcher::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IndiError::Eof));
        assert_eq!(driver.fired, vec![poll, once, poll, poll]);
        assert_eq!(driver.gets, 1);
        assert!(ctx.remaining_timer(once).is_none());
        assert!(ctx.remaining_timer(poll).is_some());
    }

    #[tokio::test]
    async fn test_work_proc_runs_while_idle() {
        let ctx = IndiContext::new(SharedBuffer::new());
        let mut driver = Sensor {
            work: Some(ctx.add_work_proc()),
            ..Default::default()
        };

        let (client, server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let mut client = client;
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = client.write_all(b"<getProperties version='1.7'/>").await;
        });

        let err = run(&ctx, &mut driver, BufReader::new(server), &Dispatcher::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IndiError::Eof));
        assert_eq!(driver.work_runs, 3);
        assert_eq!(driver.gets, 1);
        assert!(!ctx.has_work_procs());
    }
}
