//! [`Actuator`] backed by an external page driver process.
//!
//! The driver (typically a small headless-browser script) is spawned from
//! `driver.command` and speaks line-delimited JSON over stdin/stdout. Every
//! request carries an `id` and receives exactly one reply with the same id:
//!
//! ```text
//! > {"id":3,"op":"arm","url_contains":"https://stats.popcat.click/pop","status":201,"method":"POST"}
//! < {"id":3,"ok":true,"wait":1}
//! > {"id":4,"op":"click","selector":"div.cat-img"}
//! < {"id":4,"ok":true}
//! > {"id":5,"op":"await","wait":1,"timeout_ms":10000}
//! < {"id":5,"ok":false,"error":"TimeoutError: Timeout of 10000 ms exceeded"}
//! ```
//!
//! Ops: `navigate{url}`, `set_cookie{name,value}`, `click{selector}`,
//! `arm{url_contains,status,method}` → `{wait}`, `await{wait,timeout_ms}` →
//! `{status,body}`, `flagged` → `{flagged}`, `close`. Driver stderr is inherited
//! so its own logging lands next to ours.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, instrument, warn};

use crate::io::actuator::{Actuator, ConfirmedResponse, ResponseMatcher, WaitId};

/// Reply deadline for page operations (navigation can be slow).
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(60);
/// Extra time granted on top of an `await` op's own timeout.
const AWAIT_REPLY_GRACE: Duration = Duration::from_secs(2);
/// How long `close` waits for the driver to exit before killing it.
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum DriverOp<'a> {
    Navigate {
        url: &'a str,
    },
    SetCookie {
        name: &'a str,
        value: &'a str,
    },
    Click {
        selector: &'a str,
    },
    Arm {
        url_contains: &'a str,
        status: u16,
        method: &'a str,
    },
    Await {
        wait: u64,
        timeout_ms: u64,
    },
    Flagged,
    Close,
}

#[derive(Serialize)]
struct DriverRequest<'a> {
    id: u64,
    #[serde(flatten)]
    op: &'a DriverOp<'a>,
}

#[derive(Debug, serde::Deserialize)]
struct DriverReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    data: Map<String, Value>,
}

/// Actuator that forwards every operation to a driver subprocess.
pub struct DriverActuator {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl DriverActuator {
    /// Spawn `command` (program followed by arguments).
    ///
    /// The child is killed if the actuator is dropped without `close`. On unix
    /// it gets its own process group, so a terminal Ctrl+C reaches only popbot
    /// and the session stays up until `close`.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("driver command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(program = %program, "spawning page driver");
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn driver {program}"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
        })
    }

    #[instrument(skip_all)]
    async fn request(
        &mut self,
        op: DriverOp<'_>,
        reply_timeout: Duration,
    ) -> Result<Map<String, Value>> {
        let id = self.next_id;
        self.next_id += 1;
        debug!(id, ?op, "driver request");

        let mut line = serde_json::to_string(&DriverRequest { id, op: &op })
            .context("serialize driver request")?;
        line.push('\n');

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("driver closed: stdin already released"))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| anyhow!("driver closed: write request: {err}"))?;
        stdin
            .flush()
            .await
            .map_err(|err| anyhow!("driver closed: flush request: {err}"))?;

        match tokio::time::timeout(reply_timeout, self.read_reply(id)).await {
            Ok(reply) => reply,
            Err(_) => Err(anyhow!(
                "Timeout after {}ms waiting for driver reply {id}",
                reply_timeout.as_millis()
            )),
        }
    }

    async fn read_reply(&mut self, id: u64) -> Result<Map<String, Value>> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|err| anyhow!("driver closed: read reply: {err}"))?
                .ok_or_else(|| anyhow!("driver closed: stdout ended"))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let reply: DriverReply = match serde_json::from_str(line) {
                Ok(reply) => reply,
                Err(err) => {
                    debug!(line, error = %err, "ignoring non-protocol driver output");
                    continue;
                }
            };
            // Replies to requests we stopped waiting for arrive late; drop them.
            if reply.id != id {
                debug!(expected = id, got = reply.id, "skipping stale driver reply");
                continue;
            }
            if !reply.ok {
                return Err(anyhow!(
                    reply
                        .error
                        .unwrap_or_else(|| "driver reported failure".to_string())
                ));
            }
            return Ok(reply.data);
        }
    }
}

fn take_field<T: DeserializeOwned>(data: &mut Map<String, Value>, key: &str) -> Result<T> {
    let value = data
        .remove(key)
        .ok_or_else(|| anyhow!("driver reply missing `{key}`"))?;
    serde_json::from_value(value).with_context(|| format!("parse driver reply field `{key}`"))
}

#[async_trait]
impl Actuator for DriverActuator {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.request(DriverOp::Navigate { url }, REPLY_TIMEOUT).await?;
        Ok(())
    }

    async fn set_cookie(&mut self, name: &str, value: &str) -> Result<()> {
        self.request(DriverOp::SetCookie { name, value }, REPLY_TIMEOUT).await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        self.request(DriverOp::Click { selector }, REPLY_TIMEOUT).await?;
        Ok(())
    }

    async fn arm_confirmation(&mut self, matcher: &ResponseMatcher) -> Result<WaitId> {
        let mut data = self
            .request(
                DriverOp::Arm {
                    url_contains: &matcher.url_contains,
                    status: matcher.status,
                    method: &matcher.method,
                },
                REPLY_TIMEOUT,
            )
            .await?;
        Ok(WaitId(take_field(&mut data, "wait")?))
    }

    async fn await_confirmation(
        &mut self,
        wait: WaitId,
        timeout: Duration,
    ) -> Result<ConfirmedResponse> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let data = self
            .request(
                DriverOp::Await {
                    wait: wait.0,
                    timeout_ms,
                },
                timeout + AWAIT_REPLY_GRACE,
            )
            .await?;
        serde_json::from_value(Value::Object(data)).context("parse driver confirmation")
    }

    async fn is_flagged(&mut self) -> Result<bool> {
        let mut data = self.request(DriverOp::Flagged, REPLY_TIMEOUT).await?;
        take_field(&mut data, "flagged")
    }

    async fn close(&mut self) -> Result<()> {
        if self.stdin.is_some()
            && let Err(err) = self.request(DriverOp::Close, EXIT_TIMEOUT).await
        {
            let error = format!("{err:#}");
            debug!(%error, "driver close request failed");
        }
        // EOF on stdin tells well-behaved drivers to exit.
        drop(self.stdin.take());

        match tokio::time::timeout(EXIT_TIMEOUT, self.child.wait()).await {
            Ok(status) => {
                let status = status.context("wait for driver exit")?;
                debug!(exit_code = ?status.code(), "driver exited");
            }
            Err(_) => {
                warn!(
                    timeout_secs = EXIT_TIMEOUT.as_secs(),
                    "driver did not exit, killing"
                );
                self.child.kill().await.context("kill driver")?;
            }
        }
        Ok(())
    }
}
