//! HTTP task handle and the future that performs the transfer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures_util::StreamExt;
use reqwest::header::{RETRY_AFTER, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tracing::{Instrument, debug, debug_span};
use url::Url;

use crate::request::{TransportBody, TransportRequest};
use crate::task::{
    Credential, Progress, ProtectionSpace, ResponseBody, TaskEvents, TaskId, TaskMetrics,
    TaskOutput, TaskStatus, TransportError, TransportTask,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Suspended,
    Running,
    Cancelled,
}

/// Handle to a transfer performed by [`HttpTransport`](super::HttpTransport).
///
/// Starts suspended. `resume`, `suspend` and `cancel` only flip a control
/// value that the transfer future observes between I/O steps.
#[derive(Debug)]
pub struct HttpTask {
    id: TaskId,
    control: watch::Sender<Control>,
    status: Mutex<TaskStatus>,
}

impl HttpTask {
    pub(super) fn new(id: TaskId) -> Self {
        let (control, _) = watch::channel(Control::Suspended);
        Self {
            id,
            control,
            status: Mutex::new(TaskStatus::Suspended),
        }
    }

    fn set_status(&self, apply: impl FnOnce(TaskStatus) -> Option<(TaskStatus, Control)>) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((next, control)) = apply(*status) {
            *status = next;
            self.control.send_replace(control);
        }
    }

    fn mark_completed(&self) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = TaskStatus::Completed;
    }
}

impl TransportTask for HttpTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn status(&self) -> TaskStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resume(&self) {
        self.set_status(|status| match status {
            TaskStatus::Suspended => Some((TaskStatus::Running, Control::Running)),
            _ => None,
        });
    }

    fn suspend(&self) {
        self.set_status(|status| match status {
            TaskStatus::Running => Some((TaskStatus::Suspended, Control::Suspended)),
            _ => None,
        });
    }

    fn cancel(&self) {
        self.set_status(|status| match status {
            TaskStatus::Running | TaskStatus::Suspended => {
                Some((TaskStatus::Canceling, Control::Cancelled))
            }
            _ => None,
        });
    }
}

/// Performs one transfer and reports it through [`TaskEvents`].
pub(super) struct TaskRunner {
    client: Client,
    request: TransportRequest,
    events: TaskEvents,
    task: Arc<HttpTask>,
    error_for_status: bool,
}

impl TaskRunner {
    pub(super) fn new(
        client: Client,
        request: TransportRequest,
        events: TaskEvents,
        task: Arc<HttpTask>,
        error_for_status: bool,
    ) -> Self {
        Self {
            client,
            request,
            events,
            task,
            error_for_status,
        }
    }

    /// Waits for the first resume, transfers, then reports metrics followed by
    /// completion. Both notifications are sent on every path.
    pub(super) async fn run(self) {
        let id = self.task.id;
        let span = debug_span!("http_task", task_id = %id, url = %self.request.url);
        async move {
            let mut control = self.task.control.subscribe();
            let mut metrics = TaskMetrics::default();

            let result = match wait_until_running(&mut control).await {
                Ok(()) => {
                    let started = Instant::now();
                    let result = self.execute(&mut control, &mut metrics).await;
                    metrics.duration = started.elapsed();
                    result
                }
                Err(error) => Err(error),
            };

            match &result {
                Ok(output) => {
                    debug!(
                        status = output.status,
                        bytes = metrics.bytes_received,
                        "transfer finished"
                    );
                }
                Err(error) => debug!(%error, "transfer failed"),
            }
            self.task.mark_completed();
            self.events.metrics_gathered(id, metrics);
            self.events.completed(id, result);
        }
        .instrument(span)
        .await;
    }

    async fn execute(
        &self,
        control: &mut watch::Receiver<Control>,
        metrics: &mut TaskMetrics,
    ) -> Result<TaskOutput, TransportError> {
        let body = self.load_body().await?;
        metrics.bytes_sent = body.as_ref().map_or(0, |bytes| bytes.len() as u64);

        let mut response = self.send(body.clone(), None, control).await?;
        if response.status() == StatusCode::UNAUTHORIZED
            && let Some(space) = self.challenge(&response)
            && let Some(credential) = self.events.credential_challenge(self.task.id, &space)
        {
            metrics.auth_attempts += 1;
            debug!(realm = ?space.realm, "answering basic auth challenge");
            response = self.send(body, Some(credential), control).await?;
        }

        let status = response.status();
        if self.error_for_status && !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            return Err(TransportError::http_status_with_retry_after(
                self.request.url.as_str(),
                status.as_u16(),
                retry_after,
            ));
        }

        let headers = response.headers().clone();
        let body = self.stream_body(response, control, metrics).await?;
        Ok(TaskOutput {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    async fn load_body(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match &self.request.body {
            TransportBody::Empty => Ok(None),
            TransportBody::Bytes(bytes) => Ok(Some(bytes.clone())),
            TransportBody::File(path) => tokio::fs::read(path)
                .await
                .map(Some)
                .map_err(|e| TransportError::io(path, e)),
        }
    }

    async fn send(
        &self,
        body: Option<Vec<u8>>,
        credential: Option<Credential>,
        control: &watch::Receiver<Control>,
    ) -> Result<Response, TransportError> {
        let mut builder = self
            .client
            .request(self.request.method.clone(), self.request.url.clone())
            .headers(self.request.headers.clone());
        if let Some(timeout) = self.request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        if let Some(credential) = credential {
            builder = builder.basic_auth(credential.user, credential.password);
        }

        tokio::select! {
            result = builder.send() => {
                result.map_err(|e| TransportError::network(self.request.url.as_str(), e))
            }
            () = until_cancelled(control.clone()) => Err(TransportError::Cancelled),
        }
    }

    fn challenge(&self, response: &Response) -> Option<ProtectionSpace> {
        let header = response.headers().get(WWW_AUTHENTICATE)?.to_str().ok()?;
        parse_basic_challenge(header, &self.request.url)
    }

    async fn stream_body(
        &self,
        response: Response,
        control: &mut watch::Receiver<Control>,
        metrics: &mut TaskMetrics,
    ) -> Result<ResponseBody, TransportError> {
        // A server that ignores the range answers 200 and the file is rewritten.
        let resumed = self
            .request
            .resume_offset
            .filter(|_| response.status() == StatusCode::PARTIAL_CONTENT)
            .unwrap_or(0);
        let total = response.content_length().map(|length| length + resumed);
        let mut sink = match &self.request.destination {
            Some(path) => Sink::open(path, resumed > 0).await?,
            None => Sink::Memory(Vec::new()),
        };
        if resumed > 0 {
            debug!(offset = resumed, "appending to partial download");
        }

        let mut completed = resumed;
        let mut stream = response.bytes_stream();
        loop {
            if *control.borrow() == Control::Suspended {
                debug!("transfer paused");
                wait_until_running(control).await?;
            }
            let next = tokio::select! {
                next = stream.next() => next,
                () = until_cancelled(control.clone()) => return Err(TransportError::Cancelled),
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| TransportError::network(self.request.url.as_str(), e))?;

            sink.write(&chunk).await?;
            metrics.bytes_received += chunk.len() as u64;
            completed += chunk.len() as u64;
            self.events.progress(self.task.id, Progress { completed, total });
        }
        sink.finish().await
    }
}

enum Sink {
    Memory(Vec<u8>),
    File {
        path: PathBuf,
        writer: BufWriter<File>,
    },
}

impl Sink {
    async fn open(path: &Path, append: bool) -> Result<Self, TransportError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransportError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .await
            .map_err(|e| TransportError::io(path, e))?;
        Ok(Self::File {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        match self {
            Self::Memory(buffer) => {
                buffer.extend_from_slice(chunk);
                Ok(())
            }
            Self::File { path, writer } => writer
                .write_all(chunk)
                .await
                .map_err(|e| TransportError::io(path.as_path(), e)),
        }
    }

    async fn finish(self) -> Result<ResponseBody, TransportError> {
        match self {
            Self::Memory(buffer) if buffer.is_empty() => Ok(ResponseBody::Empty),
            Self::Memory(buffer) => Ok(ResponseBody::Bytes(buffer)),
            Self::File { path, mut writer } => {
                writer
                    .flush()
                    .await
                    .map_err(|e| TransportError::io(path.as_path(), e))?;
                Ok(ResponseBody::File(path))
            }
        }
    }
}

/// Blocks while suspended. Fails if the task is cancelled first.
async fn wait_until_running(control: &mut watch::Receiver<Control>) -> Result<(), TransportError> {
    let state = control
        .wait_for(|state| *state != Control::Suspended)
        .await
        .map_or(Control::Cancelled, |state| *state);
    if state == Control::Cancelled {
        return Err(TransportError::Cancelled);
    }
    Ok(())
}

async fn until_cancelled(mut control: watch::Receiver<Control>) {
    if control
        .wait_for(|state| *state == Control::Cancelled)
        .await
        .is_err()
    {
        std::future::pending::<()>().await;
    }
}

/// Parses a `WWW-Authenticate` value, accepting only the Basic scheme.
fn parse_basic_challenge(header: &str, url: &Url) -> Option<ProtectionSpace> {
    let header = header.trim();
    let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let realm = params
        .split(',')
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("realm"))
        .map(|(_, value)| value.trim().trim_matches('"').to_owned());
    Some(ProtectionSpace {
        host: url.host_str()?.to_owned(),
        port: url.port(),
        scheme: "basic".to_owned(),
        realm,
    })
}
