use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::{TaskId, spawn};

/// A message interface for [services](Service).
///
/// Most commonly, this is an enumeration of messages, but it can also be implemented on a single
/// message. For each individual message, this type needs to implement the [`FromMessage`] trait.
/// Services that do not receive messages use the unit type `()`.
///
/// # Implementating Interfaces
///
/// ```
/// use ferry_system::{FromMessage, Interface, NoResponse};
///
/// struct MyMessage;
///
/// enum MyInterface {
///     MyMessage(MyMessage),
/// }
///
/// impl Interface for MyInterface {}
///
/// impl FromMessage<MyMessage> for MyInterface {
///     type Response = NoResponse;
///
///     fn from_message(message: MyMessage, _: ()) -> Self {
///         Self::MyMessage(message)
///     }
/// }
/// ```
pub trait Interface: Send + 'static {}

impl Interface for () {}

/// An error when [sending](Addr::send) a message to a service fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendError;

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to send message to service")
    }
}

impl std::error::Error for SendError {}

/// Response behavior of an [`Interface`] message.
pub trait MessageResponse {
    /// Sends responses from the service back to the waiting recipient.
    type Sender;

    /// The type returned from [`Addr::send`].
    type Output;

    /// Returns the response channel for an interface message.
    fn channel() -> (Self::Sender, Self::Output);
}

/// The response type for messages without a response.
pub struct NoResponse;

impl MessageResponse for NoResponse {
    type Sender = ();
    type Output = ();

    fn channel() -> (Self::Sender, Self::Output) {
        ((), ())
    }
}

/// The request when sending an asynchronous message to a service.
///
/// This is returned from [`Addr::send`] when the message responds asynchronously through
/// [`AsyncResponse`]. It is a future that resolves once the service responded, or with a
/// [`SendError`] if the service dropped the sender.
pub struct Request<T>(oneshot::Receiver<T>);

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").finish_non_exhaustive()
    }
}

impl<T> Future for Request<T> {
    type Output = Result<T, SendError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|result| result.map_err(|_| SendError))
    }
}

/// Sends a message response from a service back to the waiting [`Request`].
pub struct Sender<T>(oneshot::Sender<T>);

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("open", &!self.0.is_closed())
            .finish()
    }
}

impl<T> Sender<T> {
    /// Sends the response value.
    ///
    /// If the requester is no longer interested in the response, the value is dropped.
    pub fn send(self, value: T) {
        self.0.send(value).ok();
    }
}

/// Message response resulting in an asynchronous [`Request`].
pub struct AsyncResponse<T>(PhantomData<fn(T)>);

impl<T> fmt::Debug for AsyncResponse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncResponse")
    }
}

impl<T> MessageResponse for AsyncResponse<T> {
    type Sender = Sender<T>;
    type Output = Request<T>;

    fn channel() -> (Self::Sender, Self::Output) {
        let (tx, rx) = oneshot::channel();
        (Sender(tx), Request(rx))
    }
}

/// Declares a message as part of an [`Interface`].
///
/// The `Response` associated type determines whether the sender can wait for an answer.
pub trait FromMessage<M>: Interface {
    /// The behavior declaring the return value when sending this message.
    type Response: MessageResponse;

    /// Converts the message into the service interface.
    fn from_message(message: M, sender: <Self::Response as MessageResponse>::Sender) -> Self;
}

/// The address of a [`Service`].
///
/// Addresses allow to [send](Self::send) messages to a service that implements a corresponding
/// [`Interface`] as long as the service is running. Addresses can be freely cloned. Once all
/// addresses are dropped, the service's [`Receiver`] returns `None`.
pub struct Addr<I: Interface> {
    tx: mpsc::UnboundedSender<I>,
    name: &'static str,
}

impl<I: Interface> fmt::Debug for Addr<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Addr")
            .field("name", &self.name)
            .field("open", &!self.tx.is_closed())
            .finish()
    }
}

// Manually derive clone since we do not require `I: Clone` and the Clone derive adds this
// constraint.
impl<I: Interface> Clone for Addr<I> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: self.name,
        }
    }
}

impl<I: Interface> Addr<I> {
    /// Sends a message to the service and returns the response.
    ///
    /// Depending on the message's response behavior, this either returns a future resolving to the
    /// return value, or does not return anything for fire-and-forget messages. The communication
    /// channel with the service is unbounded, so backlogs could occur when sending too many
    /// messages.
    ///
    /// Sending asynchronous messages can fail with `Err(SendError)` if the service has shut down.
    pub fn send<M>(&self, message: M) -> <<I as FromMessage<M>>::Response as MessageResponse>::Output
    where
        I: FromMessage<M>,
    {
        let (tx, rx) = <<I as FromMessage<M>>::Response as MessageResponse>::channel();
        if self.tx.send(I::from_message(message, tx)).is_err() {
            ferry_log::trace!(service = self.name, "message sent to stopped service");
        }
        rx
    }

    /// Returns `true` if the service has stopped receiving messages.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Inbound channel for messages sent through an [`Addr`].
pub struct Receiver<I: Interface> {
    rx: mpsc::UnboundedReceiver<I>,
    name: &'static str,
}

impl<I: Interface> Receiver<I> {
    /// Receives the next value for this receiver.
    ///
    /// This method returns `None` once all [addresses](Addr) have been dropped. The receiver is
    /// not closed automatically in this case, so services may keep running.
    pub async fn recv(&mut self) -> Option<I> {
        self.rx.recv().await
    }

    /// Returns the name of the service owning this receiver.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<I: Interface> fmt::Debug for Receiver<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("name", &self.name)
            .finish()
    }
}

/// Creates an unbounded channel for communicating with a [`Service`].
pub fn channel<I: Interface>(name: &'static str) -> (Addr<I>, Receiver<I>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Addr { tx, name }, Receiver { rx, name })
}

/// An asynchronous unit responding to messages.
///
/// Services receive messages conforming to some [`Interface`] through a [`Receiver`] and handle
/// them one by one. Internally, services are free to concurrently process these messages or not.
///
/// The `run` future is the entire life of the service: it sets up timers, waits for messages and
/// observes shutdown. It returns once the service has stopped.
///
/// # Example
///
/// ```
/// use ferry_system::{FromMessage, Interface, NoResponse, Receiver, Service, ServiceRunner};
///
/// struct MyMessage;
///
/// impl Interface for MyMessage {}
///
/// impl FromMessage<Self> for MyMessage {
///     type Response = NoResponse;
///
///     fn from_message(message: Self, _: ()) -> Self {
///         message
///     }
/// }
///
/// struct MyService;
///
/// impl Service for MyService {
///     type Interface = MyMessage;
///
///     async fn run(self, mut rx: Receiver<Self::Interface>) {
///         while let Some(_message) = rx.recv().await {
///             // handle the message
///         }
///     }
/// }
///
/// let runtime = tokio::runtime::Runtime::new().unwrap();
/// runtime.block_on(async {
///     let mut runner = ServiceRunner::new();
///     let addr = runner.start(MyService);
///     addr.send(MyMessage);
///     drop(addr);
///     runner.join().await;
/// });
/// ```
pub trait Service: Sized + Send + 'static {
    /// The interface of messages this service implements.
    type Interface: Interface;

    /// Runs the service until it stops.
    fn run(self, rx: Receiver<Self::Interface>) -> impl Future<Output = ()> + Send + 'static;

    /// Returns a unique name for this service implementation.
    ///
    /// This is used for task names and metrics.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Keeps track of running services and allows to wait for all of them to stop.
#[derive(Debug, Default)]
pub struct ServiceRunner(Vec<(&'static str, JoinHandle<()>)>);

impl ServiceRunner {
    /// Creates an empty runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a service on the current runtime and returns its address.
    pub fn start<S: Service>(&mut self, service: S) -> Addr<S::Interface> {
        let (addr, rx) = channel(S::name());
        self.start_with(service, rx);
        addr
    }

    /// Starts a service with an existing receiver.
    ///
    /// This allows to hand out the address before the service itself is constructed.
    pub fn start_with<S: Service>(&mut self, service: S, rx: Receiver<S::Interface>) {
        let handle = spawn(TaskId::for_service::<S>(), service.run(rx));
        self.0.push((S::name(), handle));
    }

    /// Returns the number of started services.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no services were started.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Waits until all started services have stopped.
    ///
    /// A service that panicked is logged and does not prevent waiting for the others.
    pub async fn join(self) {
        for (name, handle) in self.0 {
            if let Err(error) = handle.await {
                ferry_log::error!(
                    error = &error as &dyn std::error::Error,
                    service = name,
                    "service terminated unexpectedly",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Add(usize);

    struct GetTotal;

    enum Counter {
        Add(usize),
        GetTotal(Sender<usize>),
    }

    impl Interface for Counter {}

    impl FromMessage<Add> for Counter {
        type Response = NoResponse;

        fn from_message(message: Add, _: ()) -> Self {
            Self::Add(message.0)
        }
    }

    impl FromMessage<GetTotal> for Counter {
        type Response = AsyncResponse<usize>;

        fn from_message(_: GetTotal, sender: Sender<usize>) -> Self {
            Self::GetTotal(sender)
        }
    }

    struct CounterService {
        total: usize,
        stopped: Arc<AtomicUsize>,
    }

    impl Service for CounterService {
        type Interface = Counter;

        async fn run(mut self, mut rx: Receiver<Self::Interface>) {
            while let Some(message) = rx.recv().await {
                match message {
                    Counter::Add(n) => self.total += n,
                    Counter::GetTotal(sender) => sender.send(self.total),
                }
            }
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_send_and_respond() {
        ferry_test::setup();

        let stopped = Arc::new(AtomicUsize::new(0));
        let mut runner = ServiceRunner::new();
        let addr = runner.start(CounterService {
            total: 0,
            stopped: stopped.clone(),
        });

        addr.send(Add(2));
        addr.send(Add(3));
        assert_eq!(addr.send(GetTotal).await, Ok(5));

        drop(addr);
        runner.join().await;
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_to_stopped_service() {
        let (addr, rx) = channel::<Counter>("counter");
        drop(rx);

        assert!(addr.is_closed());
        assert_eq!(addr.send(GetTotal).await, Err(SendError));
    }

    struct Panicking;

    impl Service for Panicking {
        type Interface = ();

        async fn run(self, _rx: Receiver<Self::Interface>) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn test_join_survives_panics() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let mut runner = ServiceRunner::new();
        runner.start(Panicking);
        let addr = runner.start(CounterService {
            total: 0,
            stopped: stopped.clone(),
        });
        drop(addr);

        assert_eq!(runner.len(), 2);
        runner.join().await;
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}
