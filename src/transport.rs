pub use p2p_voice_tokio_transport::{
    TokioWebSocketTransport, TokioWebSocketTransportFactory, Transport, TransportEvent,
    TransportFactory,
};
