//! ==============================================================================
//! acceptor.rs - bounded connection admission and end-of-stream signalling
//! ==============================================================================
//!
//! purpose:
//!     opens the listening port, admits up to `max_connections` sensor
//!     connections (each handed straight to its own worker thread), then
//!     closes the port, joins every worker and finally pushes the single
//!     end-of-stream marker into the queue.
//!
//! ordering:
//!     the marker is pushed only after the last worker thread has been joined,
//!     so no real reading can ever follow it into the queue.
//!
//! relationships:
//!     - spawned by: main.rs (on a blocking thread)
//!     - spawns: worker.rs (std::thread per connection)
//!     - writes: queue.rs (end-of-stream)
//!
//! ==============================================================================

use crate::domain::Reading;
use crate::logsink::LogSink;
use crate::queue::SharedQueue;
use crate::worker::ConnectionWorker;

use anyhow::{Context, Result};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct Acceptor {
    listener: TcpListener,
    max_connections: usize,
    idle_timeout: Duration,
    queue: Arc<SharedQueue>,
    events: Arc<dyn LogSink>,
}

impl Acceptor {
    /// open the listening endpoint; failure here is fatal for the gateway
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        max_connections: usize,
        idle_timeout: Duration,
        queue: Arc<SharedQueue>,
        events: Arc<dyn LogSink>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).context("Failed to open listening endpoint")?;
        Ok(Self {
            listener,
            max_connections,
            idle_timeout,
            queue,
            events,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// serve exactly `max_connections` connections, then signal end-of-stream
    ///
    /// returns the number of connections handled. an error means the
    /// listening endpoint failed and the gateway cannot continue.
    pub fn run(self) -> Result<usize> {
        let Acceptor {
            listener,
            max_connections,
            idle_timeout,
            queue,
            events,
        } = self;

        let local = listener.local_addr()?;
        tracing::info!("[ACCEPTOR] listening on {} for {} connection(s)", local, max_connections);

        let mut workers = Vec::with_capacity(max_connections);
        for n in 1..=max_connections {
            let (stream, peer) = listener.accept().context("Failed to accept connection")?;
            tracing::info!("[ACCEPTOR] connection {}/{} from {}", n, max_connections, peer);

            let worker = match ConnectionWorker::from_tcp(
                stream,
                idle_timeout,
                Arc::clone(&queue),
                Arc::clone(&events),
            ) {
                Ok(worker) => worker,
                Err(e) => {
                    // the slot is used up either way
                    tracing::error!("[ACCEPTOR] could not configure socket from {}: {}", peer, e);
                    events.log("Sensor node unknown has closed the connection");
                    continue;
                }
            };

            let handle = thread::Builder::new()
                .name(format!("conn-{}", n))
                .spawn(move || worker.run())
                .context("Failed to spawn connection worker")?;
            workers.push(handle);
        }

        drop(listener);
        tracing::info!("[ACCEPTOR] connection limit reached, listener closed");

        for handle in workers {
            let name = handle.thread().name().unwrap_or("conn").to_string();
            match handle.join() {
                Ok(exit) => tracing::debug!("[ACCEPTOR] {} finished: {}", name, exit),
                Err(_) => tracing::error!("[ACCEPTOR] {} panicked", name),
            }
        }

        queue
            .push(Reading::end_of_stream())
            .context("Failed to push end-of-stream marker")?;
        tracing::info!("[ACCEPTOR] all connections closed, end of stream signalled");

        Ok(max_connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConsumerId;
    use crate::logsink::MemorySink;
    use crate::queue::{Pop, QueueError};
    use crate::wire;
    use std::io::Write;
    use std::net::TcpStream;
    use std::sync::mpsc;

    const C: ConsumerId = ConsumerId(0);

    fn acceptor(max: usize, timeout: Duration) -> (Acceptor, Arc<SharedQueue>, Arc<MemorySink>) {
        let queue = Arc::new(SharedQueue::new([C]).unwrap());
        let sink = Arc::new(MemorySink::default());
        let acceptor =
            Acceptor::bind("127.0.0.1:0", max, timeout, queue.clone(), sink.clone()).unwrap();
        (acceptor, queue, sink)
    }

    #[test]
    fn marker_follows_the_last_worker_exit() {
        let (acceptor, queue, sink) = acceptor(3, Duration::from_secs(10));
        let addr = acceptor.local_addr().unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let runner = thread::spawn(move || {
            let served = acceptor.run();
            done_tx.send(()).unwrap();
            served
        });

        let mut clients: Vec<TcpStream> = (1..=3u16)
            .map(|id| {
                let mut client = TcpStream::connect(addr).unwrap();
                client.write_all(&wire::encode(&Reading::new(id, 20.0, 1))).unwrap();
                client
            })
            .collect();

        let mut ids: Vec<u16> = (0..3)
            .map(|_| match queue.pop(C).unwrap() {
                Pop::Reading(r) => r.sensor_id,
                Pop::EndOfStream => panic!("marker before workers finished"),
            })
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);

        // all three connections are still open
        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(queue.len().unwrap(), 0);

        let last = clients.pop().unwrap();
        drop(clients);
        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(queue.len().unwrap(), 0);

        drop(last);
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(runner.join().unwrap().unwrap(), 3);
        assert!(TcpStream::connect(addr).is_err());

        assert_eq!(queue.pop(C).unwrap(), Pop::EndOfStream);
        // exactly one marker: the queue is sealed behind it
        assert!(matches!(queue.push(Reading::new(1, 1.0, 1)), Err(QueueError::Sealed)));

        let lines = sink.lines();
        assert_eq!(lines.iter().filter(|l| l.contains("opened")).count(), 3);
        assert_eq!(lines.iter().filter(|l| l.contains("closed")).count(), 3);
    }

    #[test]
    fn idle_connections_time_out_and_release_the_acceptor() {
        let (acceptor, queue, sink) = acceptor(1, Duration::from_millis(200));
        let addr = acceptor.local_addr().unwrap();
        let runner = thread::spawn(move || acceptor.run());

        let client = TcpStream::connect(addr).unwrap();
        assert_eq!(runner.join().unwrap().unwrap(), 1);
        assert_eq!(queue.pop(C).unwrap(), Pop::EndOfStream);
        assert_eq!(sink.lines(), vec!["Sensor node unknown has closed the connection"]);
        drop(client);
    }

    #[test]
    fn unconfigurable_socket_still_uses_a_slot_and_logs_its_close() {
        // a zero read timeout is rejected by set_read_timeout
        let (acceptor, queue, sink) = acceptor(1, Duration::ZERO);
        let addr = acceptor.local_addr().unwrap();
        let runner = thread::spawn(move || acceptor.run());

        let client = TcpStream::connect(addr).unwrap();
        assert_eq!(runner.join().unwrap().unwrap(), 1);
        assert_eq!(queue.pop(C).unwrap(), Pop::EndOfStream);
        assert_eq!(sink.lines(), vec!["Sensor node unknown has closed the connection"]);
        drop(client);
    }

    #[test]
    fn listener_is_closed_after_the_limit() {
        let (acceptor, _queue, _sink) = acceptor(1, Duration::from_millis(100));
        let addr = acceptor.local_addr().unwrap();
        let runner = thread::spawn(move || acceptor.run());

        drop(TcpStream::connect(addr).unwrap());
        runner.join().unwrap().unwrap();

        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn occupied_port_is_a_startup_error() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let queue = Arc::new(SharedQueue::new([C]).unwrap());
        let result = Acceptor::bind(
            taken.local_addr().unwrap(),
            1,
            Duration::from_secs(1),
            queue,
            Arc::new(MemorySink::default()),
        );
        assert!(result.is_err());
    }
}
