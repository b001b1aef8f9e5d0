//! 연결 코어
//!
//! 하나의 연결은 세 개의 장수명 태스크(수신 루프, 재전송/송신 루프,
//! 지연 ACK 루프)와 사용자 Read/Write 호출자가 협력하는 구조다.
//! 송신 큐와 혼잡 상태는 outlock이, 수신 큐와 전달 상태는 inlock이
//! 보호한다.
//!
//! 태스크 사이 통신은 가장자리 병합 방식의 유계 채널이다: 가득 찬
//! 채널로의 비차단 송신은 조용히 버려지고, 상태 변화당 최소 한 번의
//! 웨이크업만 보장한다. 유일한 예외는 쓰기 제출 시의 `VSWND_ACTIVE`로,
//! 재전송 타이머가 꺼진 채 송신자가 앞서 나가지 못하도록 차단 송신한다.
//!
//! 락은 데이터그램 전송을 가로질러 잡지 않는다: 송신 메타데이터 갱신과
//! 마샬은 락 안에서 끝내고, 소켓 `send_to`는 락을 놓은 뒤 수행한다
//! (ackHit의 "상태 변경 → 해제 → 신호"와 같은 순서).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::Mutex as PlMutex;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::{self, flag, Packet, MAX_SACK_WORDS};
use crate::pool::BufferPool;
use crate::queue::{PacketQueue, QNode};
use crate::rtt::Estimator;
use crate::stats::ConnStats;
use crate::timer::{now_ms, LoopTimer};

// ACK 요구 수준 / 루프 이벤트 값
pub(crate) const VACK_SCHED: u8 = 1;
pub(crate) const VACK_QUICK: u8 = 2;
pub(crate) const VACK_MUST: u8 = 3;
pub(crate) const VSWND_ACTIVE: u8 = 4;
pub(crate) const VRETR_IMMED: u8 = 5;
/// 모든 루프 제어 스트림의 종료 신호
pub(crate) const EV_CLOSE: u8 = 0xff;

/// 재전송 스캔 결과: 타이머가 필요 없음
const RETR_REST: i64 = -1;

/// FIN을 확인하는 누적 ACK의 seq 표식
const FIN_ACK_SEQ: u32 = u32::MAX;

/// 단일 패킷 송신 횟수 안전 한계 (핸드쉐이크 재시도 한도와는 별개)
const SCNT_BOUND: i32 = 20;

/// evClose: FIN이 확인됨
const S_FIN0: u8 = 1;
/// evClose: FIN 재전송 한도 초과
const S_DEAD: u8 = 2;

/// FIN 제출/확인 대기의 상한
const CLOSE_WAIT: Duration = Duration::from_secs(30);

/// SACK 시간 기준점 (가장 최근 삽입된 수신 패킷)
struct TimeRef {
    seq: u32,
    received: i64,
    scnt: u8,
}

/// 송신 큐 + 혼잡 상태 (outlock 보호 구간)
struct OutState {
    queue: PacketQueue,
    my_seq: u32,
    out_pending: i32,
    cwnd: i32,
    missed: i32,
    last_shrink: i64,
    est: Estimator,
    out_pk_cnt: u64,
    out_dup_cnt: u64,
    f_r_cnt: u64,
}

/// 수신 큐 + 전달 상태 (inlock 보호 구간)
struct InState {
    queue: PacketQueue,
    last_read_seq: u32,
    in_max_ctn_seq: u32,
    /// 수신 큐 꼬리 아래에 홀이 있는지
    dirty: bool,
    /// 순서 확정된 페이로드를 모아 두는 준비 버퍼
    ready: BytesMut,
    last_ack: u32,
    last_ack_time: i64,
    last_ins: Option<TimeRef>,
    in_pk_cnt: u64,
    in_dup_cnt: u64,
    /// 읽기 웨이크업 스트림. 떨어뜨리면 읽기 방향이 닫힌다.
    read_tx: Option<mpsc::Sender<u8>>,
    /// 상대가 보낸 FIN의 seq (데이터 완결 후에만 확인한다)
    fin_seq: Option<u32>,
}

struct ConnInner {
    cfg: Arc<Config>,
    sock: Arc<UdpSocket>,
    dest: SocketAddr,
    conn_id: u32,
    pool: Arc<BufferPool>,
    /// 엔드포인트 라우팅 테이블 (해제용으로만 접근)
    registry: Arc<DashMap<u32, mpsc::Sender<BytesMut>>>,

    out: Mutex<OutState>,
    inb: Mutex<InState>,

    // outlock 없이 읽는 공표 값 (ACK 주기, ACK 재전송 제한 등)
    rtt_ms: AtomicI64,
    ato_ms: AtomicI64,

    ev_send_tx: mpsc::Sender<u8>,
    ev_send_rx: Mutex<mpsc::Receiver<u8>>,
    ev_swnd_tx: mpsc::Sender<u8>,
    ev_ack_tx: mpsc::Sender<u8>,
    ev_close_tx: mpsc::Sender<u8>,
    ev_close_rx: Mutex<mpsc::Receiver<u8>>,
    ev_read_rx: Mutex<mpsc::Receiver<u8>>,

    /// 읽기/쓰기 데드라인 (ms 오프셋, 블로킹 시도마다 1회 소비)
    rtmo: PlMutex<i64>,
    wtmo: PlMutex<i64>,

    closing: AtomicBool,
    closed: AtomicBool,
}

/// 신뢰성 있는 순서 보장 바이트 스트림 연결
///
/// `read`와 `write`는 각각 단일 호출자를 전제로 한다. 핸들은 값싸게
/// 복제되므로 읽기/쓰기 태스크에 하나씩 나눠 줄 수 있다.
#[derive(Clone)]
pub struct Conn {
    inner: Arc<ConnInner>,
}

impl Conn {
    /// 핸드쉐이크를 마친 연결을 기동한다 (엔드포인트 전용)
    pub(crate) fn spawn(
        cfg: Arc<Config>,
        sock: Arc<UdpSocket>,
        dest: SocketAddr,
        conn_id: u32,
        pool: Arc<BufferPool>,
        registry: Arc<DashMap<u32, mpsc::Sender<BytesMut>>>,
        recv_rx: mpsc::Receiver<BytesMut>,
        bootstrap_rtt_ms: i64,
    ) -> Self {
        let est = Estimator::bootstrap(bootstrap_rtt_ms, cfg.bandwidth_bps(), cfg.mss, cfg.debug);
        let (ev_send_tx, ev_send_rx) = mpsc::channel(2);
        let (ev_swnd_tx, ev_swnd_rx) = mpsc::channel(2);
        let (ev_ack_tx, ev_ack_rx) = mpsc::channel(2);
        let (ev_close_tx, ev_close_rx) = mpsc::channel(2);
        let (ev_read_tx, ev_read_rx) = mpsc::channel(1);
        let cwnd = est.swnd.min(16);
        let inner = Arc::new(ConnInner {
            rtt_ms: AtomicI64::new(est.rtt),
            ato_ms: AtomicI64::new(est.ato),
            out: Mutex::new(OutState {
                queue: PacketQueue::new(),
                my_seq: 0,
                out_pending: 0,
                cwnd,
                missed: 0,
                last_shrink: 0,
                est,
                out_pk_cnt: 0,
                out_dup_cnt: 0,
                f_r_cnt: 0,
            }),
            inb: Mutex::new(InState {
                queue: PacketQueue::new(),
                last_read_seq: 0,
                in_max_ctn_seq: 0,
                dirty: false,
                ready: BytesMut::new(),
                last_ack: 0,
                last_ack_time: -(1 << 32),
                last_ins: None,
                in_pk_cnt: 0,
                in_dup_cnt: 0,
                read_tx: Some(ev_read_tx),
                fin_seq: None,
            }),
            cfg,
            sock,
            dest,
            conn_id,
            pool,
            registry,
            ev_send_tx,
            ev_send_rx: Mutex::new(ev_send_rx),
            ev_swnd_tx,
            ev_ack_tx,
            ev_close_tx,
            ev_close_rx: Mutex::new(ev_close_rx),
            ev_read_rx: Mutex::new(ev_read_rx),
            rtmo: PlMutex::new(0),
            wtmo: PlMutex::new(0),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(inner.clone().recv_loop(recv_rx));
        tokio::spawn(inner.clone().send_loop(ev_swnd_rx));
        tokio::spawn(inner.clone().ack_loop(ev_ack_rx));
        Self { inner }
    }

    /// 순서 확정된 바이트를 읽는다
    ///
    /// 데이터가 없으면 웨이크업 또는 읽기 데드라인까지 대기한다.
    /// 읽기 방향이 닫히고 준비 버퍼가 비면 `Eof`.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut read_rx = self.inner.ev_read_rx.lock().await;
        let mut stream_closed = false;
        loop {
            {
                let mut inb = self.inner.inb.lock().await;
                if !inb.ready.is_empty() {
                    let n = buf.len().min(inb.ready.len());
                    let chunk = inb.ready.split_to(n);
                    buf[..n].copy_from_slice(&chunk);
                    return Ok(n);
                }
                if self.inner.read_in_q(&mut inb) {
                    continue;
                }
                if stream_closed {
                    return Err(Error::Eof);
                }
            }
            let rtmo = {
                let mut r = self.inner.rtmo.lock();
                std::mem::take(&mut *r)
            };
            if rtmo > 0 {
                match tokio::time::timeout(Duration::from_millis(rtmo as u64), read_rx.recv())
                    .await
                {
                    Ok(Some(_)) => {}
                    Ok(None) => stream_closed = true,
                    Err(_) => return Err(Error::IoTimeout),
                }
            } else {
                match read_rx.recv().await {
                    Some(_) => {}
                    None => stream_closed = true,
                }
            }
        }
    }

    /// 바이트 슬라이스를 MSS 단위로 쪼개 전송한다
    ///
    /// 미확인 패킷이 cwnd에 도달하면 윈도우가 열리거나 쓰기 데드라인이
    /// 만료될 때까지 대기한다.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        if self.inner.closing.load(Ordering::Relaxed) {
            return Err(Error::Eof);
        }
        let mut nr = 0;
        for chunk in data.chunks(self.inner.cfg.mss) {
            let pk = Packet::data(chunk, self.inner.pool.get());
            self.inner.input_and_send(pk).await?;
            nr += chunk.len();
        }
        Ok(nr)
    }

    /// 연결 종료
    ///
    /// FIN을 일반 송신 경로로 흘려보내고 확인을 기다린 뒤 루프들을
    /// 정리한다. FIN 재전송 한도를 넘기면 `ConnectionDead`.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            while !self.inner.closed.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            return Ok(());
        }
        let fin = Packet::control(flag::FIN, 0, 0);
        let mut dead = false;
        match tokio::time::timeout(CLOSE_WAIT, self.inner.input_and_send(fin)).await {
            Ok(Ok(())) => {
                let mut close_rx = self.inner.ev_close_rx.lock().await;
                match tokio::time::timeout(CLOSE_WAIT, close_rx.recv()).await {
                    Ok(Some(S_DEAD)) | Err(_) => dead = true,
                    Ok(_) => {}
                }
            }
            Ok(Err(_)) | Err(_) => dead = true,
        }
        self.inner.teardown().await;
        if dead {
            Err(Error::ConnectionDead)
        } else {
            Ok(())
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.sock.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.dest
    }

    /// 읽기/쓰기 데드라인을 함께 설정 (지금부터의 오프셋)
    pub fn set_deadline(&self, d: Duration) {
        self.set_read_deadline(d);
        self.set_write_deadline(d);
    }

    /// 읽기 데드라인 설정. 다음 블로킹 시도에서 1회 소비된다.
    pub fn set_read_deadline(&self, d: Duration) {
        *self.inner.rtmo.lock() = d.as_millis() as i64;
    }

    /// 쓰기 데드라인 설정. 다음 블로킹 시도에서 1회 소비된다.
    pub fn set_write_deadline(&self, d: Duration) {
        *self.inner.wtmo.lock() = d.as_millis() as i64;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// 카운터/윈도우 스냅샷
    pub async fn stats(&self) -> ConnStats {
        let mut s = {
            let out = self.inner.out.lock().await;
            ConnStats {
                out_pk_cnt: out.out_pk_cnt,
                out_dup_cnt: out.out_dup_cnt,
                f_r_cnt: out.f_r_cnt,
                cwnd: out.cwnd,
                swnd: out.est.swnd,
                out_pending: out.out_pending,
                rtt: out.est.rtt,
                rto: out.est.rto,
                ..Default::default()
            }
        };
        let inb = self.inner.inb.lock().await;
        s.in_pk_cnt = inb.in_pk_cnt;
        s.in_dup_cnt = inb.in_dup_cnt;
        s
    }
}

impl ConnInner {
    // ------------------------------------------------------------------
    // 수신 루프
    // ------------------------------------------------------------------

    /// 디코딩된 데이터그램을 분배한다. 스트림이 닫히면 종료.
    async fn recv_loop(self: Arc<Self>, mut recv_rx: mpsc::Receiver<BytesMut>) {
        while let Some(buf) = recv_rx.recv().await {
            if self.closed.load(Ordering::Relaxed) {
                break;
            }
            let Some(pk) = Packet::decode(buf) else {
                continue;
            };
            if pk.flag & flag::SACK != 0 {
                self.process_sack(&pk).await;
                self.pool.put(pk.buffer);
                continue;
            }
            if pk.flag & flag::ACK != 0 {
                self.process_ack(&pk).await;
            }
            if pk.flag & flag::DATA != 0 {
                self.insert_data(pk).await;
            } else if pk.flag & flag::FIN != 0 {
                self.close_r(pk).await;
            } else {
                self.pool.put(pk.buffer);
            }
        }
    }

    // ------------------------------------------------------------------
    // 송신 루프: RTO 재전송 + Fast Retransmit
    // ------------------------------------------------------------------

    async fn send_loop(self: Arc<Self>, mut swnd_rx: mpsc::Receiver<u8>) {
        let mut timer = LoopTimer::new();
        timer.reset(self.rtt_ms.load(Ordering::Relaxed));
        loop {
            tokio::select! {
                v = swnd_rx.recv() => {
                    let Some(v) = v else { break };
                    match v {
                        VRETR_IMMED => {
                            let bufs = {
                                let mut out = self.out.lock().await;
                                self.retransmit2(&mut out)
                            };
                            for wire in &bufs {
                                self.send_datagram(wire).await;
                            }
                        }
                        VSWND_ACTIVE => {
                            timer.try_active(self.rtt_ms.load(Ordering::Relaxed));
                        }
                        EV_CLOSE => break,
                        _ => {}
                    }
                }
                _ = timer.expired() => {
                    let mut notify = false;
                    let bufs = {
                        let mut out = self.out.lock().await;
                        let (rest, bufs) = self.retransmit(&mut out);
                        match rest {
                            RETR_REST | 0 => {
                                if out.queue.size() > 0 {
                                    timer.reset(out.est.rtt);
                                } else {
                                    timer.stop();
                                    // 송신자 블로킹 방지
                                    notify = true;
                                }
                            }
                            _ => timer.reset(rest.min(out.est.rtt)),
                        }
                        bufs
                    };
                    for wire in &bufs {
                        self.send_datagram(wire).await;
                    }
                    if notify {
                        let _ = self.ev_send_tx.try_send(1);
                    }
                }
            }
            if self.closed.load(Ordering::Relaxed) {
                break;
            }
        }
    }

    /// RTO 기반 재전송 스캔
    ///
    /// cwnd개의 미확인 노드 범위에서, RTO가 지난 노드는 재전송 대상으로
    /// 마샬하고 아닌 노드는 다음 발화까지 남은 최소 시간을 모은다.
    /// `limit`은 비-RTO 분기에서만 줄어드는데, 이는 재전송 버스트가
    /// 아니라 rest 계산의 미리보기 범위를 제한한다. 마샬된 데이터그램은
    /// 호출측이 outlock을 놓은 뒤에 전송한다.
    fn retransmit(&self, out: &mut OutState) -> (i64, Vec<Vec<u8>>) {
        let now = now_ms();
        let rto = out.est.rto;
        let mut rest: i64 = 0;
        let mut count: i32 = 0;
        let mut limit = out.cwnd;
        let mut fin_dead = false;
        let mut bufs = Vec::new();
        for node in out.queue.iter_mut() {
            if limit <= 0 {
                break;
            }
            let diff = now - node.sent;
            if diff > rto {
                match self.marshal_for_send(node) {
                    Some(wire) => {
                        bufs.push(wire);
                        count += 1;
                    }
                    None => fin_dead = true,
                }
            } else {
                rest = if rest > 0 {
                    rest.min(rto - diff + 1)
                } else {
                    rto - diff + 1
                };
                limit -= 1;
            }
        }
        out.out_dup_cnt += count as u64;
        if count > 0 {
            // RTO가 cwnd의 1/8(FR) 또는 1/4(비FR)을 넘으면 반감
            let shrcond = (self.cfg.fast_retransmit && count > out.cwnd >> 3)
                || (!self.cfg.fast_retransmit && count > out.cwnd >> 2);
            if shrcond && !self.cfg.super_retransmit {
                debug!(
                    from = out.cwnd,
                    to = out.cwnd >> 1,
                    floor = out.est.swnd >> 1,
                    "shrink cwnd"
                );
                out.last_shrink = now_ms();
                out.cwnd = (out.cwnd >> 1).max(out.est.swnd >> 1);
            }
        }
        if fin_dead {
            let _ = self.ev_close_tx.try_send(S_DEAD);
        }
        if out.queue.size() > 0 {
            (rest, bufs)
        } else {
            (RETR_REST, bufs)
        }
    }

    /// SACK 불연속 보고로 트리거되는 Fast Retransmit
    ///
    /// 홀로 3회 이상 보고됐고 마지막 송신 뒤 rtt + max(rtt/16, 1)이
    /// 지난 노드만 재전송 대상으로 마샬한다. 전송은 호출측이 outlock을
    /// 놓은 뒤에 한다.
    fn retransmit2(&self, out: &mut OutState) -> Vec<Vec<u8>> {
        let rtt = out.est.rtt;
        let f_rtt = rtt + (rtt >> 4).max(1);
        let limit = (out.cwnd - out.out_pending).min(out.cwnd >> 2).max(8);
        let now = now_ms();
        let mut count: i32 = 0;
        let mut fin_dead = false;
        let mut bufs = Vec::new();
        for node in out.queue.iter_mut() {
            if count >= limit {
                break;
            }
            if node.miss >= 3 && now - node.sent >= f_rtt {
                match self.marshal_for_send(node) {
                    Some(wire) => {
                        bufs.push(wire);
                        count += 1;
                    }
                    None => fin_dead = true,
                }
            }
        }
        out.out_dup_cnt += count as u64;
        out.f_r_cnt += count as u64;
        if fin_dead {
            let _ = self.ev_close_tx.try_send(S_DEAD);
        }
        bufs
    }

    // ------------------------------------------------------------------
    // 송신 경로
    // ------------------------------------------------------------------

    /// seq를 배정하고 큐에 넣은 뒤 1회 전송한다 (입장 제어 포함)
    async fn input_and_send(&self, mut pk: Packet) -> Result<()> {
        let mut send_rx = self.ev_send_rx.lock().await;
        let mut out = self.out.lock().await;
        // 미확인(누락 보고 포함) 패킷 수가 cwnd를 넘으면 대기
        while out.out_pending >= out.cwnd {
            drop(out);
            let wtmo = {
                let mut w = self.wtmo.lock();
                std::mem::take(&mut *w)
            };
            if wtmo > 0 {
                match tokio::time::timeout(Duration::from_millis(wtmo as u64), send_rx.recv())
                    .await
                {
                    Ok(Some(EV_CLOSE)) | Ok(None) => return Err(Error::Eof),
                    Ok(Some(_)) => {}
                    Err(_) => return Err(Error::IoTimeout),
                }
            } else {
                match send_rx.recv().await {
                    Some(EV_CLOSE) | None => return Err(Error::Eof),
                    Some(_) => {}
                }
            }
            out = self.out.lock().await;
        }
        out.out_pending += 1;
        out.out_pk_cnt += 1;
        out.my_seq = out.my_seq.wrapping_add(1);
        pk.seq = out.my_seq;
        let mut node = QNode::outbound(pk);
        // scnt 0이라 항상 마샬된다
        let wire = self.marshal_for_send(&mut node);
        out.queue.append_tail(node);
        drop(out);
        drop(send_rx);
        if let Some(wire) = wire {
            self.send_datagram(&wire).await;
        }
        // 재전송 타이머 활성화. 반드시 차단 송신이어야 한다.
        self.ev_swnd_tx
            .send(VSWND_ACTIVE)
            .await
            .map_err(|_| Error::Eof)?;
        Ok(())
    }

    /// 송신 직전 처리: 메타데이터 갱신과 마샬. 전송은 하지 않으므로
    /// 락 안에서 불러도 된다 (실제 `send_to`는 락 해제 후).
    ///
    /// 반환이 `None`이면 FIN의 재전송 한도를 넘긴 것이다. FIN이 아닌
    /// 패킷의 한도 초과는 버그이므로 즉시 중단한다.
    fn marshal_for_send(&self, node: &mut QNode) -> Option<Vec<u8>> {
        if node.scnt >= SCNT_BOUND {
            if node.packet.flag & flag::FIN != 0 {
                return None;
            }
            panic!(
                "too many retries: seq={} scnt={}",
                node.packet.seq, node.scnt
            );
        }
        node.sent_1 = node.sent;
        node.sent = now_ms();
        node.scnt += 1;
        let wire = node.packet.marshall(self.conn_id, node.scnt as u8).to_vec();
        if self.cfg.debug >= 3 {
            debug!(
                ty = node.packet.type_name(),
                seq = node.packet.seq,
                ack = node.packet.ack,
                scnt = node.scnt,
                len = node.packet.payload_len(),
                "send"
            );
        }
        Some(wire)
    }

    async fn send_datagram(&self, wire: &[u8]) {
        if let Err(e) = self.sock.send_to(wire, self.dest).await {
            warn!(error = %e, "datagram send failed");
        }
    }

    /// 큐에 넣지 않는 제어 패킷(ACK/SACK) 전송. 락을 쥔 채 부르지 않는다.
    async fn transmit(&self, node: &mut QNode) {
        if let Some(wire) = self.marshal_for_send(node) {
            self.send_datagram(&wire).await;
        }
    }

    // ------------------------------------------------------------------
    // ACK/SACK 처리 (송신 큐 쪽)
    // ------------------------------------------------------------------

    /// 누적 ACK 처리. 중복 ACK은 무시하되, SYN이 실려 있으면 핸드쉐이크
    /// 3번째 ACK 유실로 보고 마지막 누적 ACK을 재전송한다 (rtt 간격 제한).
    async fn process_ack(&self, pk: &Packet) {
        let mut out = self.out.lock().await;
        if out.queue.contains(pk.ack) {
            let drained = out.queue.delete_before(pk.ack);
            let deleted = drained.len() as i32;
            Self::ack_hit(&mut out, deleted, 0);
            if self.cfg.debug >= 2 {
                debug!(on = pk.ack, deleted, "ACK hit");
            }
            drop(out);
            let _ = self.ev_send_tx.try_send(1);
            if pk.seq == FIN_ACK_SEQ {
                let _ = self.ev_close_tx.try_send(S_FIN0);
            }
            for node in drained {
                self.pool.put(node.packet.buffer);
            }
        } else {
            if self.cfg.debug >= 2 {
                debug!(on = pk.ack, "ACK miss");
            }
            drop(out);
            if pk.flag & flag::SYN != 0 {
                if let Some(mut node) = self.make_last_ack().await {
                    self.transmit(&mut node).await;
                }
            }
        }
    }

    /// SACK 처리: 시간 기준점 측정 → 비트맵 적용 → FR 트리거 → ackHit
    async fn process_sack(&self, pk: &Packet) {
        // 손상된 SACK 페이로드는 조용히 폐기
        let Some((bmap, tbl, delayed, scnt)) = packet::unmarshall_sack(pk.payload()) else {
            return;
        };
        let mut out = self.out.lock().await;
        if pk.flag & flag::TIME != 0 {
            self.measure_in(&mut out, pk.seq, delayed as i64, scnt);
        }
        let (drained, missed, continuous) = out.queue.delete_by_bitmap(&bmap, pk.ack, tbl);
        let deleted = drained.len() as i32;
        if self.cfg.fast_retransmit && !continuous {
            // 상대 큐가 불연속이면 FR 트리거
            let _ = self.ev_swnd_tx.try_send(VRETR_IMMED);
        }
        let hit = deleted > 0;
        if hit {
            Self::ack_hit(&mut out, deleted, missed);
        }
        if self.cfg.debug >= 2 {
            debug!(
                deleted,
                out_pending = out.out_pending,
                on = pk.ack,
                "SACK"
            );
        }
        drop(out);
        if hit {
            let _ = self.ev_send_tx.try_send(1);
        }
        for node in drained {
            self.pool.put(node.packet.buffer);
        }
    }

    /// 확인 진행에 따른 혼잡 피드백. outlock 안에서 상태를 갱신하고,
    /// 호출측은 락 해제 후 송신자에게 신호를 보낸다.
    fn ack_hit(out: &mut OutState, deleted: i32, missed: i32) {
        out.out_pending -= deleted;
        let now = now_ms();
        if out.cwnd < out.est.swnd && now - out.last_shrink > out.est.rtt {
            out.cwnd += out.cwnd >> 1;
        }
        if out.cwnd > out.est.swnd {
            out.cwnd = out.est.swnd;
        }
        if missed >= out.missed {
            out.missed = missed;
        } else {
            out.missed = (out.missed + missed) >> 1;
        }
        // 보고된 홀을 흡수할 여유 윈도우
        out.cwnd += out.missed;
    }

    /// 시간 기준점 SACK을 추정기에 반영한다
    ///
    /// 재전송된 패킷은 scnt 차이로 송신 시각을 귀속한다: 같으면 최근
    /// 송신, 1 차이면 직전 송신, 그 이상은 귀속 불가로 포기.
    fn measure_in(&self, out: &mut OutState, seq: u32, delayed: i64, wire_scnt: u8) {
        let Some(target) = out.queue.get(seq) else {
            return;
        };
        let last_sent = match target.scnt - wire_scnt as i32 {
            0 => target.sent,
            1 => target.sent_1,
            _ => return,
        };
        out.est.measure(now_ms(), last_sent, delayed);
        self.rtt_ms.store(out.est.rtt, Ordering::Relaxed);
        self.ato_ms.store(out.est.ato, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // 수신 경로
    // ------------------------------------------------------------------

    /// 수신 데이터 패킷을 분류해 수신 큐에 넣는다
    async fn insert_data(&self, pk: Packet) {
        let mut inb = self.inb.lock().await;
        let seq = pk.seq;
        let behind = seq.wrapping_sub(inb.last_read_seq);
        // 이미 읽었거나 큐에 있는 중복: 마지막 ACK이 유실됐다는 뜻
        if behind == 0 || behind > u32::MAX / 2 || inb.queue.contains(seq) {
            let _ = self.ev_ack_tx.try_send(VACK_MUST);
            inb.in_dup_cnt += 1;
            if self.cfg.debug >= 2 {
                debug!(seq, "duplicated");
            }
            drop(inb);
            self.pool.put(pk.buffer);
            return;
        }
        let now = now_ms();
        let wire_scnt = pk.scnt;
        let node = QNode::received(pk, now);
        let in_max_ctn_seq = inb.in_max_ctn_seq;
        let dis = inb.queue.search_insert(node, in_max_ctn_seq);
        if self.cfg.debug >= 3 {
            debug!(seq, dis, last_read = inb.last_read_seq, "recv DATA");
        }
        let mut ack_state = VACK_MUST;
        let mut available = false;
        match dis {
            0 => {
                // 위 중복 검사를 지나왔으므로 사실상 도달 불가
                inb.in_dup_cnt += 1;
                return;
            }
            1 => {
                if inb.dirty {
                    let from = inb.last_read_seq.wrapping_add(1);
                    if let Some((max, reaches_tail)) = inb.queue.search_max_continued(from) {
                        inb.in_max_ctn_seq = max;
                        available = true;
                        // 큐 전체가 다시 순서대로면 홀 없음
                        if reaches_tail {
                            inb.dirty = false;
                        }
                    }
                } else {
                    // 이상적인 상황: 순서대로 도착
                    inb.in_max_ctn_seq = seq;
                    available = true;
                    ack_state = VACK_QUICK;
                }
            }
            _ => {
                // 순서 밖 도착: 홀 발생/확대
                inb.dirty = true;
            }
        }
        inb.in_pk_cnt += 1;
        inb.last_ins = Some(TimeRef {
            seq,
            received: now,
            scnt: wire_scnt,
        });
        let _ = self.ev_ack_tx.try_send(ack_state);
        let mut fin_ack = None;
        if available {
            if let Some(tx) = &inb.read_tx {
                let _ = tx.try_send(1);
            }
            fin_ack = self.maybe_finish_read(&mut inb);
        }
        drop(inb);
        if let Some(mut node) = fin_ack {
            self.transmit(&mut node).await;
        }
    }

    /// 준비 버퍼 보충: 연속 구간 전체를 큐에서 승격한다
    fn read_in_q(&self, inb: &mut InState) -> bool {
        let next = inb.last_read_seq.wrapping_add(1);
        if inb.queue.head_seq() == Some(next) && inb.last_read_seq != inb.in_max_ctn_seq {
            inb.last_read_seq = inb.in_max_ctn_seq;
            let max = inb.in_max_ctn_seq;
            for node in inb.queue.delete_before(max) {
                inb.ready.extend_from_slice(node.packet.payload());
                // 페이로드는 복사됐으니 버퍼 재활용
                self.pool.put(node.packet.buffer);
            }
            // 읽기 진행을 배경 ACK으로 알린다 (ato 주기로 병합됨)
            let _ = self.ev_ack_tx.try_send(VACK_SCHED);
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // 지연 ACK 루프
    // ------------------------------------------------------------------

    async fn ack_loop(self: Arc<Self>, mut ack_rx: mpsc::Receiver<u8>) {
        let mut timer = LoopTimer::new();
        timer.reset(self.ato_ms.load(Ordering::Relaxed));
        let mut last_state: u8 = 0;
        loop {
            let mut demand: u8;
            tokio::select! {
                _ = timer.expired() => {
                    demand = VACK_MUST;
                }
                v = ack_rx.recv() => {
                    let Some(v) = v else { break };
                    if v == EV_CLOSE {
                        break;
                    }
                    timer.try_active(self.ato_ms.load(Ordering::Relaxed));
                    demand = v;
                    // 요구 수준이 직전과 다르면 즉시 ACK
                    if last_state != v {
                        demand = VACK_MUST;
                    }
                    last_state = v;
                }
            }
            if self.closed.load(Ordering::Relaxed) {
                break;
            }
            // inlock 안에서 만들고, 전송은 락을 놓은 뒤
            let node = {
                let mut inb = self.inb.lock().await;
                self.make_ack(&mut inb, demand)
            };
            if let Some(mut node) = node {
                self.transmit(&mut node).await;
            }
        }
    }

    /// ACK/SACK 패킷 생성
    ///
    /// MUST 미만 요구는 마지막 ACK 후 ato가 지나지 않았으면 건너뛴다.
    /// 홀이 없으면 가짜 SACK(bmap=[1], ack=predecessor)을 만든다.
    fn make_ack(&self, inb: &mut InState, demand: u8) -> Option<QNode> {
        if demand < VACK_MUST
            && now_ms() - inb.last_ack_time < self.ato_ms.load(Ordering::Relaxed)
        {
            return None;
        }
        //        준비 큐 <-|
        //                  |-> 비트맵 시작
        //  [predecessor]  [predecessor+1]  [predecessor+2] ...
        let predecessor = inb.in_max_ctn_seq;
        let (mut bmap, mut tbl) = inb.queue.make_holes_bitmap(predecessor, MAX_SACK_WORDS);
        let mut fake = false;
        if bmap.is_empty() {
            bmap = vec![1u64];
            tbl = 1;
            fake = true;
        }
        let ack = if fake {
            predecessor
        } else {
            predecessor.wrapping_add(1)
        };
        let mut seq = 0u32;
        let mut fl = flag::SACK;
        let mut ref_scnt = 0u8;
        let mut delay = 0u16;
        // 시간 기준점: 상대가 자신의 송신-ACK 간격에서 지연을 빼고
        // RTT를 추정할 수 있도록, 최근 삽입 패킷 기준 지연을 싣는다.
        if let Some(trp) = &inb.last_ins {
            let delayed = now_ms() - trp.received;
            if delayed < self.rtt_ms.load(Ordering::Relaxed) {
                seq = trp.seq;
                fl |= flag::TIME;
                ref_scnt = trp.scnt;
                delay = delayed.clamp(1, u16::MAX as i64) as u16;
            }
        }
        let payload = packet::sack_payload(&bmap, tbl as u8, ref_scnt, delay);
        let pk = Packet::with_payload(fl, seq, ack, &payload);
        inb.last_ack = predecessor;
        inb.last_ack_time = now_ms();
        Some(QNode::outbound(pk))
    }

    /// 마지막 누적 ACK 재전송용 패킷 (rtt 간격 제한)
    async fn make_last_ack(&self) -> Option<QNode> {
        let mut inb = self.inb.lock().await;
        if now_ms() - inb.last_ack_time < self.rtt_ms.load(Ordering::Relaxed) {
            return None;
        }
        let ack = inb.last_ack.max(inb.in_max_ctn_seq);
        inb.last_ack = ack;
        inb.last_ack_time = now_ms();
        Some(QNode::outbound(Packet::control(flag::ACK, 0, ack)))
    }

    // ------------------------------------------------------------------
    // 종료
    // ------------------------------------------------------------------

    /// 상대 FIN 수신 처리
    ///
    /// FIN 앞의 데이터가 전부 도착했을 때만 FIN을 확인하고 읽기 방향을
    /// 닫는다. 미완이면 FIN 재전송이 반복되는 동안 홀을 메운다.
    async fn close_r(&self, pk: Packet) {
        let mut inb = self.inb.lock().await;
        inb.fin_seq = Some(pk.seq);
        if self.cfg.debug >= 2 {
            debug!(seq = pk.seq, "FIN received");
        }
        let fin_ack = self.maybe_finish_read(&mut inb);
        drop(inb);
        if let Some(mut node) = fin_ack {
            self.transmit(&mut node).await;
        }
        self.pool.put(pk.buffer);
    }

    /// FIN 앞 데이터가 완결됐으면 읽기 방향을 닫고 FIN 확인 패킷을
    /// 돌려준다. 전송은 호출측이 inlock을 놓은 뒤에 한다.
    fn maybe_finish_read(&self, inb: &mut InState) -> Option<QNode> {
        let fin_seq = inb.fin_seq?;
        if inb.in_max_ctn_seq.wrapping_add(1) != fin_seq {
            return None;
        }
        // 읽기 스트림을 닫아 남은 데이터 배출 후 EOF가 나가게 한다
        inb.read_tx.take();
        Some(QNode::outbound(Packet::control(flag::ACK, FIN_ACK_SEQ, fin_seq)))
    }

    /// 루프 종료와 자원 해제. 여러 번 불려도 안전하다.
    async fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let grace = Duration::from_millis(100);
        let _ = tokio::time::timeout(grace, self.ev_swnd_tx.send(EV_CLOSE)).await;
        let _ = tokio::time::timeout(grace, self.ev_ack_tx.send(EV_CLOSE)).await;
        let _ = tokio::time::timeout(grace, self.ev_send_tx.send(EV_CLOSE)).await;
        {
            let mut inb = self.inb.lock().await;
            inb.read_tx.take();
        }
        self.registry.remove(&self.conn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::AH_SIZE;

    struct Harness {
        conn: Conn,
        recv_tx: mpsc::Sender<BytesMut>,
        peer: UdpSocket,
        conn_id: u32,
    }

    /// 실제 소켓 없이 수신 스트림에 직접 패킷을 밀어 넣는 테스트 연결.
    /// 연결의 송신은 `peer` 소켓으로 나간다.
    async fn harness(cfg: Config) -> Harness {
        harness_with_rtt(cfg, 8).await
    }

    async fn harness_with_rtt(cfg: Config, rtt: i64) -> Harness {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = peer.local_addr().unwrap();
        let cfg = Arc::new(cfg);
        let pool = Arc::new(BufferPool::new(cfg.mss + AH_SIZE, 64));
        let registry = Arc::new(DashMap::new());
        let (recv_tx, recv_rx) = mpsc::channel(64);
        let conn_id = 7;
        let conn = Conn::spawn(
            cfg,
            Arc::new(sock),
            dest,
            conn_id,
            pool,
            registry,
            recv_rx,
            rtt,
        );
        Harness {
            conn,
            recv_tx,
            peer,
            conn_id,
        }
    }

    impl Harness {
        /// 패킷을 와이어 형식으로 만들어 수신 스트림에 주입
        async fn inject(&self, mut pk: Packet, scnt: u8) {
            let wire = pk.marshall(self.conn_id, scnt).to_vec();
            self.recv_tx
                .send(BytesMut::from(&wire[..]))
                .await
                .unwrap();
        }

        async fn inject_data(&self, seq: u32, payload: &[u8]) {
            let mut pk = Packet::data(payload, BytesMut::new());
            pk.seq = seq;
            self.inject(pk, 1).await;
        }

        /// peer 소켓에 도착한 패킷들을 수집
        async fn drain_peer(&self, wait: Duration) -> Vec<Packet> {
            let mut pkts = Vec::new();
            let deadline = tokio::time::Instant::now() + wait;
            let mut buf = vec![0u8; 2048];
            loop {
                let left = deadline.saturating_duration_since(tokio::time::Instant::now());
                if left.is_zero() {
                    break;
                }
                match tokio::time::timeout(left, self.peer.recv_from(&mut buf)).await {
                    Ok(Ok((n, _addr))) => {
                        if let Some(pk) = Packet::decode(BytesMut::from(&buf[..n])) {
                            pkts.push(pk);
                        }
                    }
                    _ => break,
                }
            }
            pkts
        }
    }

    #[tokio::test]
    async fn test_in_order_delivery() {
        let h = harness(Config::default()).await;
        h.inject_data(1, b"hello ").await;
        h.inject_data(2, b"world").await;
        let mut buf = [0u8; 64];
        let mut got = Vec::new();
        while got.len() < 11 {
            let n = h.conn.read(&mut buf).await.unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(&got, b"hello world");
        let stats = h.conn.stats().await;
        assert_eq!(stats.in_pk_cnt, 2);
        assert_eq!(stats.in_dup_cnt, 0);
    }

    #[tokio::test]
    async fn test_out_of_order_reassembly() {
        let h = harness(Config::default()).await;
        h.inject_data(2, b"world").await;
        h.inject_data(3, b"!").await;
        h.inject_data(1, b"hello ").await;
        let mut buf = [0u8; 64];
        let mut got = Vec::new();
        while got.len() < 12 {
            let n = h.conn.read(&mut buf).await.unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(&got, b"hello world!");
    }

    #[tokio::test]
    async fn test_duplicate_data_forces_ack() {
        let h = harness(Config::default()).await;
        h.inject_data(1, b"abc").await;
        let mut buf = [0u8; 8];
        let n = h.conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abc");

        // 같은 seq 재전송: 사용자에게는 보이지 않고 즉시 ACK만 나간다
        h.inject_data(1, b"abc").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = h.conn.stats().await;
        assert_eq!(stats.in_dup_cnt, 1);
        let acks = h.drain_peer(Duration::from_millis(200)).await;
        assert!(acks.iter().any(|p| p.flag & flag::SACK != 0));

        h.conn.set_read_deadline(Duration::from_millis(50));
        assert!(matches!(
            h.conn.read(&mut buf).await,
            Err(Error::IoTimeout)
        ));
    }

    #[tokio::test]
    async fn test_write_transmits_and_ack_prunes() {
        let h = harness(Config::default()).await;
        h.conn.write(b"0123456789").await.unwrap();
        let pkts = h.drain_peer(Duration::from_millis(200)).await;
        assert!(pkts.iter().any(|p| p.flag & flag::DATA != 0 && p.seq == 1));
        assert!(h.conn.stats().await.out_pending >= 1);

        // 누적 ACK으로 제거
        h.inject(Packet::control(flag::ACK, 0, 1), 0).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = h.conn.stats().await;
        assert_eq!(stats.out_pending, 0);
        assert_eq!(stats.out_pk_cnt, 1);
    }

    #[tokio::test]
    async fn test_ack_idempotent() {
        let h = harness(Config::default()).await;
        h.conn.write(b"x").await.unwrap();
        h.inject(Packet::control(flag::ACK, 0, 1), 0).await;
        h.inject(Packet::control(flag::ACK, 0, 1), 0).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = h.conn.stats().await;
        // 같은 ACK을 두 번 처리해도 추가 효과가 없다
        assert_eq!(stats.out_pending, 0);
    }

    #[tokio::test]
    async fn test_rto_retransmission() {
        let h = harness(Config::default()).await;
        h.conn.write(b"lost?").await.unwrap();
        // ACK을 주지 않으면 RTO(>=30ms) 후 재전송된다
        let pkts = h.drain_peer(Duration::from_millis(400)).await;
        let data_copies = pkts
            .iter()
            .filter(|p| p.flag & flag::DATA != 0 && p.seq == 1)
            .count();
        assert!(data_copies >= 2, "expected retransmission, got {data_copies}");
        assert!(h.conn.stats().await.out_dup_cnt >= 1);
    }

    #[tokio::test]
    async fn test_sack_hole_triggers_fast_retransmit() {
        // rtt를 크게 잡아 RTO 경로가 끼어들지 않게 한다 (rto=400ms)
        let h = harness_with_rtt(Config::default(), 200).await;
        // seq 1..=6 송신
        let payload = vec![0u8; 10];
        for _ in 0..6 {
            h.conn.write(&payload).await.unwrap();
        }
        h.drain_peer(Duration::from_millis(50)).await;

        // 수신측이 2..=6만 받은 상황의 SACK: base=1, 비트 1..=5 셋
        let sack = packet::sack_payload(&[0b11_1110u64], 1, 0, 0);
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(80)).await;
            h.inject(
                Packet::with_payload(flag::SACK, 0, 1, &sack),
                0,
            )
            .await;
        }
        // miss >= 3이고 rtt + max(rtt/16,1)이 지나면 FR이 seq 1을 재전송
        let pkts = h.drain_peer(Duration::from_millis(300)).await;
        assert!(pkts.iter().any(|p| p.flag & flag::DATA != 0 && p.seq == 1));
        let stats = h.conn.stats().await;
        assert!(stats.f_r_cnt >= 1, "fRCnt={}", stats.f_r_cnt);
        // SACK이 2..=6을 지웠으므로 미확인은 1뿐
        assert_eq!(stats.out_pending, 1);
    }

    #[tokio::test]
    async fn test_rto_burst_halves_cwnd() {
        let cfg = Config {
            bandwidth_mbps: 1, // swnd 바닥(8) → cwnd 8
            fast_retransmit: false,
            ..Config::default()
        };
        let h = harness(cfg).await;
        let chunk = vec![0u8; 8];
        for _ in 0..8 {
            h.conn.write(&chunk).await.unwrap();
        }
        // ACK 없이 RTO: count(8) > cwnd/4 → 반감, 바닥은 swnd/2
        tokio::time::sleep(Duration::from_millis(150)).await;
        let stats = h.conn.stats().await;
        assert!(stats.out_dup_cnt >= 8);
        assert_eq!(stats.cwnd, stats.swnd >> 1);
    }

    #[tokio::test]
    async fn test_write_deadline_io_timeout() {
        let cfg = Config {
            bandwidth_mbps: 1, // swnd 바닥(8) → cwnd 8
            ..Config::default()
        };
        let h = harness(cfg).await;
        let chunk = vec![0u8; 8];
        for _ in 0..8 {
            h.conn.write(&chunk).await.unwrap();
        }
        // 윈도우 포화 상태에서 데드라인 걸고 쓰기
        h.conn.set_write_deadline(Duration::from_millis(50));
        let started = std::time::Instant::now();
        let r = h.conn.write(&chunk).await;
        assert!(matches!(r, Err(Error::IoTimeout)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(40), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");

        // 윈도우가 열리면 데드라인 없는 쓰기는 다시 성공한다
        h.inject(Packet::control(flag::ACK, 0, 8), 0).await;
        h.conn.write(&chunk).await.unwrap();
    }

    #[tokio::test]
    async fn test_syn_dup_resends_last_ack() {
        let h = harness(Config::default()).await;
        h.inject_data(1, b"abc").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.drain_peer(Duration::from_millis(50)).await;

        // 상대의 SYN+ACK 재전송 = 3번째 ACK 유실 신호
        h.inject(Packet::control(flag::ACK | flag::SYN, 0, 9999), 0)
            .await;
        let pkts = h.drain_peer(Duration::from_millis(200)).await;
        let last_ack = pkts
            .iter()
            .find(|p| p.flag == flag::ACK)
            .expect("expected retransmitted cumulative ack");
        assert_eq!(last_ack.ack, 1);
    }

    #[tokio::test]
    async fn test_fin_closes_read_after_drain() {
        let h = harness(Config::default()).await;
        h.inject_data(1, b"bye").await;
        h.inject(Packet::control(flag::FIN, 2, 0), 1).await;

        let mut buf = [0u8; 16];
        let n = h.conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"bye");
        assert!(matches!(h.conn.read(&mut buf).await, Err(Error::Eof)));

        // FIN 확인 ACK이 나갔는지 (seq 표식으로 구분)
        let pkts = h.drain_peer(Duration::from_millis(200)).await;
        assert!(pkts
            .iter()
            .any(|p| p.flag == flag::ACK && p.seq == FIN_ACK_SEQ && p.ack == 2));
    }

    #[tokio::test]
    async fn test_fin_waits_for_hole_repair() {
        let h = harness(Config::default()).await;
        // seq 1이 빠진 채 FIN(seq 3) 도착: 확인하지 않는다
        h.inject_data(2, b"late").await;
        h.inject(Packet::control(flag::FIN, 3, 0), 1).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        let pkts = h.drain_peer(Duration::from_millis(50)).await;
        assert!(!pkts.iter().any(|p| p.seq == FIN_ACK_SEQ));

        // 홀이 메워지면 FIN을 확인하고 EOF
        h.inject_data(1, b"early ").await;
        let mut buf = [0u8; 16];
        let mut got = Vec::new();
        loop {
            match h.conn.read(&mut buf).await {
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(Error::Eof) => break,
                Err(e) => panic!("{e}"),
            }
        }
        assert_eq!(&got, b"early late");
        let pkts = h.drain_peer(Duration::from_millis(200)).await;
        assert!(pkts.iter().any(|p| p.seq == FIN_ACK_SEQ && p.ack == 3));
    }

    #[tokio::test]
    async fn test_read_deadline_io_timeout() {
        let h = harness(Config::default()).await;
        h.conn.set_read_deadline(Duration::from_millis(50));
        let mut buf = [0u8; 8];
        assert!(matches!(
            h.conn.read(&mut buf).await,
            Err(Error::IoTimeout)
        ));
    }

    #[tokio::test]
    async fn test_close_without_peer_reports_dead() {
        let h = harness(Config::default()).await;
        // 상대가 FIN을 확인해 주지 않으면 재전송 한도 후 사망 선고.
        // 한도(20회)까지 RTO 간격으로 보내므로 수 초 걸린다.
        let r = tokio::time::timeout(Duration::from_secs(25), h.conn.close()).await;
        assert!(matches!(r, Ok(Err(Error::ConnectionDead))));
        assert!(h.conn.is_closed());
    }
}
