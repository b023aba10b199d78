//! Integration tests for the fax gateway driver
//!
//! The caller is one in-process channel pair, the dialed peer is a second
//! pair handed out by a scripted requester. Tests drive both far ends
//! like the remote parties and script the engine through a gateway-only
//! factory: the mock core turns every received audio frame into one IFP
//! packet and every received IFP packet into one audio block, so frame
//! routing is observable from the outside.

use async_trait::async_trait;
use bytes::Bytes;
use faxgate_channel_core::{
    Channel, ChannelEndpoint, ChannelError, ChannelPair, ControlSignal, Frame, IfpPacket,
    T38Control, T38Parameters, T38State, VoiceFrame,
};
use faxgate_fax_core::{
    ChannelRequester, DialOutcome, EngineFactory, FaxConfig, FaxError, FaxEvent, FaxEventHandler,
    FaxGateway, FaxMode, FaxStatus, FaxTone, GatewayStats, PhaseEReporter, Result, RuntimeContext,
    T30Terminal, T38GatewayCore, T38Terminal, ToneDetector,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

fn gateway_config() -> FaxConfig {
    FaxConfig {
        local_station_id: "555 0100".into(),
        dial_timeout: Duration::from_millis(500),
        negotiation_timeout: Duration::from_millis(200),
        negotiation_poll: Duration::from_millis(50),
        watchdog_state_timeout: Duration::from_secs(5),
        watchdog_total_timeout: Duration::from_secs(10),
        ..FaxConfig::default()
    }
}

fn voice_frame(value: i16) -> Frame {
    Frame::Voice(VoiceFrame::slin(vec![value; 160]))
}

/// Voice frame carrying the marker sample the mock detector fires on
fn magic_frame() -> Frame {
    let mut samples = vec![0i16; 160];
    samples[0] = 7777;
    Frame::Voice(VoiceFrame::slin(samples))
}

/// Translation core that mirrors traffic one-to-one: each audio frame in
/// becomes one IFP packet out, each IFP packet in becomes one audio block
/// out
struct MockGatewayCore {
    next_seq: u16,
    ifp_fed: u32,
    pending_ifp: Vec<IfpPacket>,
    pending_audio: VecDeque<Vec<i16>>,
}

impl MockGatewayCore {
    fn new() -> Self {
        Self {
            next_seq: 0,
            ifp_fed: 0,
            pending_ifp: Vec::new(),
            pending_audio: VecDeque::new(),
        }
    }
}

impl T38GatewayCore for MockGatewayCore {
    fn feed_ifp(&mut self, _payload: &[u8], _seq_no: u16) {
        self.ifp_fed += 1;
        self.pending_audio.push_back(vec![5; 160]);
    }

    fn gateway_rx(&mut self, _samples: &[i16]) -> bool {
        self.next_seq += 1;
        self.pending_ifp.push(IfpPacket {
            payload: Bytes::from_static(b"relay"),
            seq_no: self.next_seq,
        });
        true
    }

    fn gateway_tx(&mut self, _max_samples: usize) -> Vec<i16> {
        self.pending_audio.pop_front().unwrap_or_default()
    }

    fn take_outbound_ifp(&mut self) -> Vec<IfpPacket> {
        std::mem::take(&mut self.pending_ifp)
    }

    fn stats(&self) -> GatewayStats {
        GatewayStats {
            bit_rate: 14400,
            error_correcting_mode: true,
            pages_transferred: self.ifp_fed / 2,
        }
    }
}

/// Fires its tone whenever a frame carries the marker sample
struct MagicToneDetector {
    tone: FaxTone,
}

impl ToneDetector for MagicToneDetector {
    fn feed(&mut self, samples: &[i16]) -> Option<FaxTone> {
        samples.contains(&7777).then_some(self.tone)
    }
}

struct GatewayMockFactory {
    gateways_built: AtomicUsize,
    detect_tones: bool,
}

impl GatewayMockFactory {
    fn new(detect_tones: bool) -> Self {
        Self {
            gateways_built: AtomicUsize::new(0),
            detect_tones,
        }
    }

    fn gateways_built(&self) -> usize {
        self.gateways_built.load(Ordering::SeqCst)
    }
}

impl EngineFactory for GatewayMockFactory {
    fn t30_terminal(
        &self,
        _calling: bool,
        _reporter: PhaseEReporter,
    ) -> Result<Box<dyn T30Terminal>> {
        Err(FaxError::engine_init("gateway-only factory"))
    }

    fn t38_terminal(
        &self,
        _calling: bool,
        _reporter: PhaseEReporter,
    ) -> Result<Box<dyn T38Terminal>> {
        Err(FaxError::engine_init("gateway-only factory"))
    }

    fn gateway(&self) -> Result<Box<dyn T38GatewayCore>> {
        self.gateways_built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockGatewayCore::new()))
    }

    fn tone_detector(&self, tone: FaxTone) -> Result<Box<dyn ToneDetector>> {
        if self.detect_tones {
            Ok(Box::new(MagicToneDetector { tone }))
        } else {
            Err(FaxError::engine_init("detectors disabled"))
        }
    }
}

/// Hands out one in-process pair per test and passes the far endpoint to
/// the test body through a oneshot
struct PairRequester {
    far_tx: Mutex<Option<oneshot::Sender<Arc<ChannelEndpoint>>>>,
    fail: bool,
}

impl PairRequester {
    fn new() -> (Self, oneshot::Receiver<Arc<ChannelEndpoint>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                far_tx: Mutex::new(Some(tx)),
                fail: false,
            },
            rx,
        )
    }

    fn failing() -> Self {
        Self {
            far_tx: Mutex::new(None),
            fail: true,
        }
    }
}

#[async_trait]
impl ChannelRequester for PairRequester {
    async fn request(
        &self,
        destination: &str,
    ) -> faxgate_channel_core::Result<Arc<dyn Channel>> {
        if self.fail {
            return Err(ChannelError::request_failed(destination, "no route"));
        }
        let (near, far) = ChannelPair::new("fax-out", "fax-out-remote");
        if let Some(tx) = self.far_tx.lock().take() {
            let _ = tx.send(far);
        }
        Ok(near)
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<FaxEvent>>,
}

#[async_trait]
impl FaxEventHandler for Recorder {
    async fn handle_event(&self, event: FaxEvent) {
        self.events.lock().push(event);
    }
}

async fn context_with_recorder(config: FaxConfig) -> (Arc<RuntimeContext>, Arc<Recorder>) {
    let ctx = RuntimeContext::new(config);
    let recorder = Arc::new(Recorder::default());
    ctx.events().register("recorder", recorder.clone()).await;
    (ctx, recorder)
}

/// Block until the leg sees the answer control the gateway sends back
async fn await_answer_control(leg: &ChannelEndpoint) {
    loop {
        match timeout(Duration::from_secs(2), leg.read())
            .await
            .expect("answer control never arrived")
            .unwrap()
        {
            Some(Frame::Control(ControlSignal::Answer)) => return,
            Some(_) => {}
            None => panic!("leg hung up before being answered"),
        }
    }
}

/// Block until the bridge requests T.38 toward the peer leg
async fn await_t38_request(far_peer: &ChannelEndpoint) {
    loop {
        match timeout(Duration::from_secs(2), far_peer.read())
            .await
            .expect("T.38 request never arrived")
            .unwrap()
        {
            Some(Frame::Control(ControlSignal::T38 {
                control: T38Control::RequestNegotiate,
                ..
            })) => return,
            Some(_) => {}
            None => panic!("peer leg hung up before the T.38 request"),
        }
    }
}

/// Feed audio until the relay produces its first IFP packet toward the
/// T.38 leg, proving the handoff completed
async fn await_first_relayed_ifp(
    caller_far: &ChannelEndpoint,
    far_peer: &ChannelEndpoint,
) -> IfpPacket {
    for _ in 0..400 {
        caller_far.write(voice_frame(1)).await.unwrap();
        if let Ok(result) = timeout(Duration::from_millis(5), far_peer.read()).await {
            match result.unwrap() {
                Some(Frame::Modem(packet)) => return packet,
                Some(_) => {}
                None => panic!("peer leg hung up before the relay started"),
            }
        }
    }
    panic!("relay never produced an IFP packet");
}

/// Drive the far side from fax tone to confirmed T.38 on the peer leg
async fn confirm_t38_on_peer(caller_far: &ChannelEndpoint, far_peer: &ChannelEndpoint) {
    caller_far.write(magic_frame()).await.unwrap();
    await_t38_request(far_peer).await;
    let parameters = T38Parameters {
        max_ifp: 256,
        ..T38Parameters::default()
    };
    far_peer
        .indicate(ControlSignal::T38 {
            control: T38Control::Negotiated,
            parameters: Some(parameters),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_dial_busy_is_relayed_and_reported() {
    let (caller, caller_far) = ChannelPair::new("fax-in", "fax-in-remote");
    let (ctx, recorder) = context_with_recorder(gateway_config()).await;
    let factory = Arc::new(GatewayMockFactory::new(false));
    let gateway = FaxGateway::new(ctx, factory.clone());
    let (requester, far_rx) = PairRequester::new();

    let far_task = tokio::spawn(async move {
        let far_peer = far_rx.await.unwrap();
        far_peer.indicate(ControlSignal::Ringing).await.unwrap();
        far_peer.indicate(ControlSignal::Busy).await.unwrap();
        far_peer
    });

    let outcome = timeout(
        Duration::from_secs(5),
        gateway.run(caller.as_ref(), &requester, "SIP/919945551234"),
    )
    .await
    .expect("test timed out")
    .unwrap();

    assert_eq!(outcome.dial, DialOutcome::Busy);
    assert_eq!(outcome.fax.status, FaxStatus::Failed);
    assert_eq!(outcome.fax.error, "Call setup failed");
    assert_eq!(outcome.fax.mode, FaxMode::Audio);
    assert!(outcome.stats.is_none());
    assert_eq!(factory.gateways_built(), 0);

    let far_peer = far_task.await.unwrap();
    assert!(far_peer.is_hungup(), "the owned peer leg must be hung up");

    // call progress must have been relayed onto the caller leg
    let mut controls = Vec::new();
    while let Ok(Ok(Some(frame))) = timeout(Duration::from_millis(50), caller_far.read()).await {
        if let Frame::Control(signal) = frame {
            controls.push(signal);
        }
    }
    assert!(controls.contains(&ControlSignal::Ringing));
    assert!(controls.contains(&ControlSignal::Busy));

    let events = recorder.events.lock();
    assert!(events.iter().any(|e| matches!(e, FaxEvent::DialBegin { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, FaxEvent::GatewayCompleted { stats: None, .. })));
}

#[tokio::test]
async fn test_dial_timeout_reports_no_answer() {
    let (caller, _caller_far) = ChannelPair::new("fax-in", "fax-in-remote");
    let config = FaxConfig {
        dial_timeout: Duration::from_millis(150),
        ..gateway_config()
    };
    let (ctx, _recorder) = context_with_recorder(config).await;
    let factory = Arc::new(GatewayMockFactory::new(false));
    let gateway = FaxGateway::new(ctx, factory.clone());
    let (requester, far_rx) = PairRequester::new();

    let far_task = tokio::spawn(async move {
        // never answer, just keep the leg alive past the dial timeout
        let far_peer = far_rx.await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        far_peer
    });

    let started = tokio::time::Instant::now();
    let outcome = timeout(
        Duration::from_secs(5),
        gateway.run(caller.as_ref(), &requester, "SIP/919945551234"),
    )
    .await
    .expect("test timed out")
    .unwrap();
    far_task.await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(outcome.dial, DialOutcome::NoAnswer);
    assert_eq!(outcome.fax.status, FaxStatus::Failed);
    assert_eq!(outcome.fax.error, "Call setup failed");
    assert_eq!(factory.gateways_built(), 0);
}

#[tokio::test]
async fn test_request_failure_is_an_outcome_not_an_error() {
    let (caller, _caller_far) = ChannelPair::new("fax-in", "fax-in-remote");
    let (ctx, recorder) = context_with_recorder(gateway_config()).await;
    let factory = Arc::new(GatewayMockFactory::new(false));
    let gateway = FaxGateway::new(ctx, factory);
    let requester = PairRequester::failing();

    let outcome = gateway
        .run(caller.as_ref(), &requester, "SIP/919945551234")
        .await
        .unwrap();

    assert_eq!(outcome.dial, DialOutcome::ChanUnavail);
    assert_eq!(outcome.fax.status, FaxStatus::Failed);
    assert_eq!(outcome.fax.error, "Channel unavailable");
    assert!(outcome.stats.is_none());
    assert!(
        recorder.events.lock().is_empty(),
        "no dial happened, so no events may be published"
    );
}

#[tokio::test]
async fn test_empty_destination_is_rejected() {
    let (caller, _caller_far) = ChannelPair::new("fax-in", "fax-in-remote");
    let (ctx, _recorder) = context_with_recorder(gateway_config()).await;
    let gateway = FaxGateway::new(ctx, Arc::new(GatewayMockFactory::new(false)));
    let requester = PairRequester::failing();

    let err = gateway.run(caller.as_ref(), &requester, "").await.unwrap_err();
    assert!(matches!(err, FaxError::InvalidArgument { .. }));
}

#[tokio::test]
async fn test_voice_call_passes_through() {
    let (caller, caller_far) = ChannelPair::new("fax-in", "fax-in-remote");
    let (ctx, _recorder) = context_with_recorder(gateway_config()).await;
    let factory = Arc::new(GatewayMockFactory::new(false));
    let gateway = FaxGateway::new(ctx, factory.clone());
    let (requester, far_rx) = PairRequester::new();

    let far_task = tokio::spawn(async move {
        let far_peer = far_rx.await.unwrap();
        far_peer.indicate(ControlSignal::Answer).await.unwrap();
        await_answer_control(&caller_far).await;

        let mut caller_heard = Vec::new();
        let mut peer_heard = Vec::new();
        for _ in 0..8 {
            caller_far.write(voice_frame(1)).await.unwrap();
            far_peer.write(voice_frame(2)).await.unwrap();
            while let Ok(Ok(Some(frame))) =
                timeout(Duration::from_millis(2), caller_far.read()).await
            {
                if let Frame::Voice(voice) = frame {
                    caller_heard.push(voice.samples);
                }
            }
            while let Ok(Ok(Some(frame))) =
                timeout(Duration::from_millis(2), far_peer.read()).await
            {
                if let Frame::Voice(voice) = frame {
                    peer_heard.push(voice.samples);
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        caller_far.hangup().await;
        (caller_heard, peer_heard)
    });

    let outcome = timeout(
        Duration::from_secs(5),
        gateway.run(caller.as_ref(), &requester, "SIP/919945551234"),
    )
    .await
    .expect("test timed out")
    .unwrap();

    assert_eq!(outcome.dial, DialOutcome::Answer);
    assert_eq!(outcome.fax.status, FaxStatus::Passed);
    assert_eq!(outcome.fax.mode, FaxMode::Audio);
    assert!(outcome.stats.is_none());
    assert_eq!(factory.gateways_built(), 0);

    let (caller_heard, peer_heard) = far_task.await.unwrap();
    assert!(
        caller_heard.iter().any(|s| s == &vec![2; 160]),
        "peer audio never reached the caller"
    );
    assert!(
        peer_heard.iter().any(|s| s == &vec![1; 160]),
        "caller audio never reached the peer"
    );
}

#[tokio::test]
async fn test_tone_triggers_handoff_and_relay() {
    let (caller, caller_far) = ChannelPair::new("fax-in", "fax-in-remote");
    // the caller leg cannot do T.38, so the handoff must target the peer
    caller.set_t38_state(T38State::Unavailable);
    let (ctx, recorder) = context_with_recorder(gateway_config()).await;
    let factory = Arc::new(GatewayMockFactory::new(true));
    let gateway = FaxGateway::new(ctx, factory.clone());
    let (requester, far_rx) = PairRequester::new();

    let far_task = tokio::spawn(async move {
        let far_peer = far_rx.await.unwrap();
        far_peer.indicate(ControlSignal::Answer).await.unwrap();
        await_answer_control(&caller_far).await;
        confirm_t38_on_peer(&caller_far, &far_peer).await;

        let first = await_first_relayed_ifp(&caller_far, &far_peer).await;
        let mut relayed = vec![first];
        for seq in 0..3u16 {
            far_peer
                .write(Frame::Modem(IfpPacket {
                    payload: Bytes::from_static(b"remote"),
                    seq_no: 100 + seq,
                }))
                .await
                .unwrap();
        }

        let mut heard = Vec::new();
        for _ in 0..40 {
            caller_far.write(voice_frame(1)).await.unwrap();
            while let Ok(Ok(Some(frame))) =
                timeout(Duration::from_millis(2), far_peer.read()).await
            {
                if let Frame::Modem(packet) = frame {
                    relayed.push(packet);
                }
            }
            while let Ok(Ok(Some(frame))) =
                timeout(Duration::from_millis(2), caller_far.read()).await
            {
                if let Frame::Voice(voice) = frame {
                    heard.push(voice.samples);
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        far_peer
            .indicate(ControlSignal::t38(T38Control::Terminated))
            .await
            .unwrap();
        (relayed, heard)
    });

    let outcome = timeout(
        Duration::from_secs(10),
        gateway.run(caller.as_ref(), &requester, "SIP/919945551234"),
    )
    .await
    .expect("test timed out")
    .unwrap();

    assert_eq!(outcome.dial, DialOutcome::Answer);
    assert_eq!(outcome.fax.status, FaxStatus::Passed);
    assert_eq!(outcome.fax.mode, FaxMode::T38);
    assert_eq!(factory.gateways_built(), 1);
    let stats = outcome.stats.expect("relay must report engine statistics");
    assert_eq!(stats.bit_rate, 14400);
    assert_eq!(outcome.fax.pages, stats.pages_transferred);
    assert_eq!(outcome.fax.bit_rate, stats.bit_rate);

    let (relayed, heard) = far_task.await.unwrap();
    assert_eq!(relayed[0].seq_no, 1, "relay must start at sequence one");
    assert!(
        relayed.windows(2).all(|w| w[1].seq_no == w[0].seq_no + 1),
        "relayed IFP must arrive in sequence order"
    );
    assert_eq!(
        heard,
        vec![vec![5; 160]; 3],
        "each received IFP must come back out as one audio block"
    );

    let events = recorder.events.lock();
    assert!(events.iter().any(|e| matches!(e, FaxEvent::DialBegin { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, FaxEvent::GatewayCompleted { stats: Some(_), .. })));
}

#[tokio::test]
async fn test_modem_frame_on_the_audio_leg_faults_the_relay() {
    let (caller, caller_far) = ChannelPair::new("fax-in", "fax-in-remote");
    caller.set_t38_state(T38State::Unavailable);
    let (ctx, _recorder) = context_with_recorder(gateway_config()).await;
    let factory = Arc::new(GatewayMockFactory::new(true));
    let gateway = FaxGateway::new(ctx, factory.clone());
    let (requester, far_rx) = PairRequester::new();

    let far_task = tokio::spawn(async move {
        let far_peer = far_rx.await.unwrap();
        far_peer.indicate(ControlSignal::Answer).await.unwrap();
        await_answer_control(&caller_far).await;
        confirm_t38_on_peer(&caller_far, &far_peer).await;
        await_first_relayed_ifp(&caller_far, &far_peer).await;

        // IFP does not belong on the audio leg
        caller_far
            .write(Frame::Modem(IfpPacket {
                payload: Bytes::from_static(b"misrouted"),
                seq_no: 7,
            }))
            .await
            .unwrap();
    });

    let outcome = timeout(
        Duration::from_secs(5),
        gateway.run(caller.as_ref(), &requester, "SIP/919945551234"),
    )
    .await
    .expect("test timed out")
    .unwrap();
    far_task.await.unwrap();

    assert_eq!(outcome.dial, DialOutcome::Answer);
    assert_eq!(outcome.fax.status, FaxStatus::Failed);
    assert_eq!(outcome.fax.error, "modem frame on the audio leg");
    assert_eq!(outcome.fax.mode, FaxMode::T38);
    assert!(
        outcome.stats.is_some(),
        "statistics survive a faulted relay"
    );
}

#[tokio::test]
async fn test_peer_hangup_during_relay_is_a_channel_error() {
    let (caller, caller_far) = ChannelPair::new("fax-in", "fax-in-remote");
    caller.set_t38_state(T38State::Unavailable);
    let (ctx, recorder) = context_with_recorder(gateway_config()).await;
    let factory = Arc::new(GatewayMockFactory::new(true));
    let gateway = FaxGateway::new(ctx, factory);
    let (requester, far_rx) = PairRequester::new();

    let far_task = tokio::spawn(async move {
        let far_peer = far_rx.await.unwrap();
        far_peer.indicate(ControlSignal::Answer).await.unwrap();
        await_answer_control(&caller_far).await;
        confirm_t38_on_peer(&caller_far, &far_peer).await;
        await_first_relayed_ifp(&caller_far, &far_peer).await;
        far_peer.hangup().await;
    });

    let result = timeout(
        Duration::from_secs(5),
        gateway.run(caller.as_ref(), &requester, "SIP/919945551234"),
    )
    .await
    .expect("test timed out");
    far_task.await.unwrap();

    let err = result.unwrap_err();
    assert!(err.is_channel_error(), "unexpected error: {}", err);

    let events = recorder.events.lock();
    assert!(events.iter().any(|e| matches!(e, FaxEvent::DialBegin { .. })));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, FaxEvent::GatewayCompleted { .. })),
        "a transport failure must not publish a completion event"
    );
}

#[tokio::test]
async fn test_relay_converges_back_to_plain_bridging() {
    let (caller, caller_far) = ChannelPair::new("fax-in", "fax-in-remote");
    caller.set_t38_state(T38State::Unavailable);
    let (ctx, _recorder) = context_with_recorder(gateway_config()).await;
    let factory = Arc::new(GatewayMockFactory::new(true));
    let gateway = FaxGateway::new(ctx, factory.clone());
    let (requester, far_rx) = PairRequester::new();

    let far_task = tokio::spawn(async move {
        let far_peer = far_rx.await.unwrap();
        far_peer.indicate(ControlSignal::Answer).await.unwrap();
        await_answer_control(&caller_far).await;
        confirm_t38_on_peer(&caller_far, &far_peer).await;
        await_first_relayed_ifp(&caller_far, &far_peer).await;

        // the caller leg comes up on T.38 as well; both sides now match
        caller_far.set_t38_state(T38State::Negotiated);

        // plain bridging is back once caller audio shows up as audio
        let mut bridged = false;
        for _ in 0..400 {
            caller_far.write(voice_frame(4)).await.unwrap();
            if let Ok(Ok(Some(Frame::Voice(_)))) =
                timeout(Duration::from_millis(5), far_peer.read()).await
            {
                bridged = true;
                break;
            }
        }
        assert!(bridged, "voice never crossed after convergence");
        caller_far.hangup().await;
    });

    let outcome = timeout(
        Duration::from_secs(10),
        gateway.run(caller.as_ref(), &requester, "SIP/919945551234"),
    )
    .await
    .expect("test timed out")
    .unwrap();
    far_task.await.unwrap();

    assert_eq!(outcome.dial, DialOutcome::Answer);
    assert_eq!(outcome.fax.status, FaxStatus::Passed);
    assert_eq!(factory.gateways_built(), 1, "one relay phase must have run");
    assert!(
        outcome.stats.is_none(),
        "a call that ends bridged reports no relay statistics"
    );
}

#[tokio::test]
async fn test_gateway_watchdog_aborts_idle_call() {
    let (caller, caller_far) = ChannelPair::new("fax-in", "fax-in-remote");
    let config = FaxConfig {
        watchdog_state_timeout: Duration::from_millis(100),
        ..gateway_config()
    };
    let (ctx, _recorder) = context_with_recorder(config).await;
    let factory = Arc::new(GatewayMockFactory::new(false));
    let gateway = FaxGateway::new(ctx, factory);
    let (requester, far_rx) = PairRequester::new();

    let far_task = tokio::spawn(async move {
        let far_peer = far_rx.await.unwrap();
        far_peer.indicate(ControlSignal::Answer).await.unwrap();
        await_answer_control(&caller_far).await;
        // both parties go silent
        tokio::time::sleep(Duration::from_millis(400)).await;
        (caller_far, far_peer)
    });

    let started = tokio::time::Instant::now();
    let outcome = timeout(
        Duration::from_secs(5),
        gateway.run(caller.as_ref(), &requester, "SIP/919945551234"),
    )
    .await
    .expect("test timed out")
    .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(outcome.dial, DialOutcome::Answer);
    assert_eq!(outcome.fax.status, FaxStatus::Failed);
    assert_eq!(outcome.fax.error, "fax watchdog timeout");
    assert_eq!(outcome.fax.mode, FaxMode::Audio);
    assert!(outcome.stats.is_none());
    far_task.await.unwrap();
}
