//! Request dispatcher
//!
//! Single-flight scheduler. Every tick either sends the head of the command
//! queue or, when the queue is empty, a `get_status` heartbeat, then makes
//! exactly one read attempt for the answer. There is never more than one
//! request on the wire.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use super::commands::{Command, Request, Response};
use super::correlation::{Completion, PendingCalls};
use super::transport::Transport;
use super::ProtocolError;

/// Highest request id before the counter wraps to 0
pub const MAX_REQUEST_ID: u16 = 16382;

/// A command waiting for its turn on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCommand {
    /// Command to send
    pub command: Command,
    /// What to do with the answer
    pub completion: Completion,
    /// Retry the write with backoff on a transient send failure
    pub with_retry: bool,
}

impl QueuedCommand {
    /// Queue entry sent with retry
    pub fn new(command: Command, completion: Completion) -> Self {
        Self {
            command,
            completion,
            with_retry: true,
        }
    }
}

/// Anything that accepts commands for later dispatch
pub trait CommandSink {
    /// Queue a command at the back
    fn submit(&mut self, command: Command, completion: Completion);
}

impl CommandSink for Vec<QueuedCommand> {
    fn submit(&mut self, command: Command, completion: Completion) {
        self.push(QueuedCommand::new(command, completion));
    }
}

/// A response matched to the request that caused it
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Request id the answer carried
    pub id: u16,
    /// Command that was answered
    pub command: Command,
    /// Completion registered for the id
    pub completion: Completion,
    /// Decoded answer
    pub response: Response,
}

/// What one tick achieved
#[derive(Debug)]
pub enum Exchange {
    /// Request written and its answer matched
    Completed(Resolved),
    /// Answer missing or for another id; link dropped, pending calls abandoned
    Desync {
        /// Id of the request just written
        sent: u16,
        /// Id the answer carried, if one decoded
        received: Option<u16>,
        /// Completions that will never be answered
        abandoned: Vec<Completion>,
    },
    /// The write failed; a queued command stays at the head of the queue
    WriteFailed(ProtocolError),
    /// Queued command could never be serialized and was discarded
    Rejected {
        /// Completion of the discarded request
        completion: Completion,
        /// Why the request could not be framed
        error: ProtocolError,
    },
    /// No link and reconnecting failed
    Offline,
}

/// Result of [`Dispatcher::tick`]
#[derive(Debug)]
pub struct DispatchReport {
    /// A new channel was opened during this tick
    pub reconnected: bool,
    /// What happened on the wire
    pub exchange: Exchange,
}

/// Single-flight protocol loop
#[derive(Debug)]
pub struct Dispatcher {
    transport: Transport,
    queue: VecDeque<QueuedCommand>,
    pending: PendingCalls,
    next_id: u16,
    /// Generation of the transport last seen, to spot reconnects
    seen_generation: u64,
    /// Set by a desync or failed reconnect, cleared by the next good exchange
    degraded: bool,
}

impl Dispatcher {
    /// Dispatcher over a transport, not yet connected
    pub fn new(transport: Transport) -> Self {
        let seen_generation = transport.generation();
        Self {
            transport,
            queue: VecDeque::new(),
            pending: PendingCalls::new(),
            next_id: 0,
            seen_generation,
            degraded: false,
        }
    }

    /// Underlying transport
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Underlying transport, mutably
    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Open the link for the first time
    pub fn connect(&mut self) -> Result<(), ProtocolError> {
        self.transport.connect()?;
        self.seen_generation = self.transport.generation();
        Ok(())
    }

    /// Close the link and forget everything in flight or queued
    pub fn shutdown(&mut self) {
        self.transport.disconnect();
        self.pending.clear();
        self.queue.clear();
    }

    /// Queue a command behind everything already queued
    pub fn enqueue(&mut self, queued: QueuedCommand) {
        self.queue.push_back(queued);
    }

    /// Queue a command ahead of everything already queued
    pub fn enqueue_front(&mut self, queued: QueuedCommand) {
        self.queue.push_front(queued);
    }

    /// Commands waiting to be written
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Requests currently awaiting an answer (0 or 1 between ticks)
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// The next tick should wait the longer backoff interval
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Id the next request will carry
    pub fn peek_next_id(&self) -> u16 {
        self.next_id
    }

    fn allocate_id(&mut self) -> u16 {
        let id = self.next_id;
        self.next_id = if id >= MAX_REQUEST_ID { 0 } else { id + 1 };
        id
    }

    /// Run one exchange.
    ///
    /// `resume_assist` is the slot whose feed-assist should be running; it is
    /// re-requested whenever the link had to be reopened.
    pub fn tick(&mut self, resume_assist: Option<u8>) -> DispatchReport {
        let mut reconnected = false;

        if !self.transport.is_connected() && !self.transport.reconnect() {
            self.degraded = true;
            return DispatchReport {
                reconnected,
                exchange: Exchange::Offline,
            };
        }
        self.check_reconnected(resume_assist, &mut reconnected);

        let exchange = self.exchange();
        self.check_reconnected(resume_assist, &mut reconnected);
        debug_assert!(self.pending.len() <= 1);

        DispatchReport {
            reconnected,
            exchange,
        }
    }

    fn check_reconnected(&mut self, resume_assist: Option<u8>, reconnected: &mut bool) {
        let generation = self.transport.generation();
        if generation == self.seen_generation {
            return;
        }
        self.seen_generation = generation;
        *reconnected = true;

        if let Some(index) = resume_assist {
            info!("Link reopened, resuming feed assist on slot {}", index);
            self.queue.push_front(QueuedCommand::new(
                Command::StartFeedAssist { index },
                Completion::FeedAssistStarted { index },
            ));
        }
    }

    fn exchange(&mut self) -> Exchange {
        let (command, completion, with_retry, from_queue) = match self.queue.front() {
            Some(head) => (
                head.command.clone(),
                head.completion.clone(),
                head.with_retry,
                true,
            ),
            None => (Command::GetStatus, Completion::Heartbeat, false, false),
        };

        let id = self.allocate_id();
        let request = Request::new(id, command);
        let frame = match request.to_frame() {
            Ok(frame) => frame,
            Err(error) => {
                warn!("dropping unsendable {} request: {}", request.command.method(), error);
                if from_queue {
                    self.queue.pop_front();
                }
                return Exchange::Rejected { completion, error };
            }
        };

        self.pending.insert(id, completion);
        debug!(">>> {}", String::from_utf8_lossy(&frame.payload));

        if let Err(e) = self.transport.write(&frame, with_retry) {
            self.pending.take(id);
            warn!("failed to send {} (id {}): {}", request.command.method(), id, e);
            return Exchange::WriteFailed(e);
        }
        if from_queue {
            self.queue.pop_front();
        }

        let received = self
            .transport
            .read_frame()
            .and_then(|frame| match Response::from_payload(&frame.payload) {
                Ok(response) => {
                    debug!("<<< {}", String::from_utf8_lossy(&frame.payload));
                    Some(response)
                }
                Err(e) => {
                    warn!("unparseable response: {}", e);
                    None
                }
            });

        match received {
            Some(response) if response.id == id => match self.pending.take(id) {
                Some(completion) => {
                    self.degraded = false;
                    Exchange::Completed(Resolved {
                        id,
                        command: request.command,
                        completion,
                        response,
                    })
                }
                None => self.desync(id, Some(response.id)),
            },
            Some(response) => self.desync(id, Some(response.id)),
            None => self.desync(id, None),
        }
    }

    fn desync(&mut self, sent: u16, received: Option<u16>) -> Exchange {
        warn!(
            "protocol desync: sent id {}, received {:?}; dropping link",
            sent, received
        );
        let abandoned = self.pending.clear();
        self.transport.disconnect();
        self.degraded = true;
        Exchange::Desync {
            sent,
            received,
            abandoned,
        }
    }
}

impl CommandSink for Dispatcher {
    fn submit(&mut self, command: Command, completion: Completion) {
        self.enqueue(QueuedCommand::new(command, completion));
    }
}
