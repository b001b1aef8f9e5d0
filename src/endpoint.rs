//! 엔드포인트: UDP 소켓 소유와 연결 디멀티플렉싱
//!
//! 수신 태스크 하나가 도착 데이터그램을 conn_id로 라우팅해 각 연결의
//! 수신 이벤트 스트림에 넣는다. 스트림이 가득 차면 조용히 버린다.
//! 데이터그램 계층 자체가 손실성이고 RTO/FR이 복구한다.
//!
//! 핸드쉐이크는 SYN / SYN+ACK / ACK 3단계로 conn_id와 초기 RTT 샘플을
//! 확립한다. 3번째 ACK이 유실되면 상대의 SYN+ACK 재전송이 확립된
//! 연결로 라우팅되어 마지막 누적 ACK 재전송으로 복구된다.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::conn::Conn;
use crate::error::{Error, Result};
use crate::packet::{self, flag, Packet, AH_SIZE};
use crate::pool::BufferPool;
use crate::timer::now_ms;
use crate::MAX_RETRIES;

/// 서버측 초기 RTT 샘플 (3번째 ACK 타이밍은 신뢰할 수 없어 기본값 사용)
const DEFAULT_BOOTSTRAP_RTT: i64 = 50;

/// 수락 대기열 크기
const ACCEPT_BACKLOG: usize = 8;

/// 핸드쉐이크 첫 재시도 간격
const DIAL_BACKOFF: Duration = Duration::from_millis(300);

struct EndpointInner {
    cfg: Arc<Config>,
    sock: Arc<UdpSocket>,
    pool: Arc<BufferPool>,
    /// conn_id → 연결 수신 스트림
    registry: Arc<DashMap<u32, mpsc::Sender<BytesMut>>>,
    /// 핸드쉐이크 진행 중인 dial 대기자 (SYN+ACK 라우팅)
    dialing: DashMap<SocketAddr, mpsc::Sender<u32>>,
    /// 주소 → conn_id (서버측 중복 SYN 처리)
    by_addr: DashMap<SocketAddr, u32>,
    accept_tx: mpsc::Sender<Conn>,
    closed: AtomicBool,
}

/// UDP 소켓 하나를 여러 연결이 공유하는 엔드포인트
pub struct Endpoint {
    inner: Arc<EndpointInner>,
    accept_rx: Mutex<mpsc::Receiver<Conn>>,
    task: JoinHandle<()>,
}

impl Endpoint {
    /// 소켓을 바인딩하고 수신 태스크를 기동한다
    pub async fn bind(addr: SocketAddr, cfg: Config) -> Result<Self> {
        let sock = Arc::new(UdpSocket::bind(addr).await?);
        let cfg = Arc::new(cfg);
        let pool = Arc::new(BufferPool::new(cfg.mss + AH_SIZE, cfg.pool_capacity));
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let inner = Arc::new(EndpointInner {
            cfg,
            sock,
            pool,
            registry: Arc::new(DashMap::new()),
            dialing: DashMap::new(),
            by_addr: DashMap::new(),
            accept_tx,
            closed: AtomicBool::new(false),
        });
        let task = tokio::spawn(inner.clone().recv_task());
        info!(addr = %inner.sock.local_addr()?, "endpoint started");
        Ok(Self {
            inner,
            accept_rx: Mutex::new(accept_rx),
            task,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.sock.local_addr()?)
    }

    /// 능동 연결 (클라이언트)
    ///
    /// SYN을 백오프 재시도하며 SYN+ACK을 기다리고, 측정한 왕복 시간으로
    /// 추정기를 초기화한다.
    pub async fn dial(&self, remote: SocketAddr) -> Result<Conn> {
        let (tx, mut rx) = mpsc::channel(1);
        self.inner.dialing.insert(remote, tx);
        let mut syn = Packet::control(flag::SYN, 0, 0);
        let wire = syn.marshall(0, 1).to_vec();
        let mut backoff = DIAL_BACKOFF;
        let mut result = None;
        for _ in 0..MAX_RETRIES {
            let sent_at = now_ms();
            self.inner.sock.send_to(&wire, remote).await?;
            match tokio::time::timeout(backoff, rx.recv()).await {
                Ok(Some(conn_id)) => {
                    result = Some((conn_id, now_ms() - sent_at));
                    break;
                }
                Ok(None) => break,
                Err(_) => backoff *= 2,
            }
        }
        self.inner.dialing.remove(&remote);
        let Some((conn_id, sample)) = result else {
            return Err(Error::HandshakeFailed {
                attempts: MAX_RETRIES,
            });
        };
        let conn = self.inner.register_conn(conn_id, remote, sample.max(1));
        // 3번째 ACK. 유실돼도 SYN+ACK 중복 수신 경로로 복구된다.
        let mut ack = Packet::control(flag::ACK, 0, 0);
        let buf = ack.marshall(conn_id, 1);
        self.inner.sock.send_to(buf, remote).await?;
        info!(%remote, conn_id, "connected");
        Ok(conn)
    }

    /// 수동 연결 수락 (서버)
    pub async fn accept(&self) -> Result<Conn> {
        self.accept_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::ChannelClosed)
    }

    /// 엔드포인트 종료: 라우팅을 비워 모든 연결의 수신 루프를 멈춘다
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.task.abort();
        self.inner.registry.clear();
        self.inner.by_addr.clear();
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl EndpointInner {
    fn register_conn(&self, conn_id: u32, remote: SocketAddr, rtt: i64) -> Conn {
        let (tx, rx) = mpsc::channel(self.cfg.recv_channel_cap);
        self.registry.insert(conn_id, tx);
        self.by_addr.insert(remote, conn_id);
        Conn::spawn(
            self.cfg.clone(),
            self.sock.clone(),
            remote,
            conn_id,
            self.pool.clone(),
            self.registry.clone(),
            rx,
            rtt,
        )
    }

    /// 마스터 수신 루프: 디코딩 없이 conn_id만 떼어 라우팅한다
    async fn recv_task(self: Arc<Self>) {
        loop {
            let mut buf = self.pool.get();
            let (n, addr) = match self.sock.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "recv failed");
                    continue;
                }
            };
            if self.closed.load(Ordering::Relaxed) {
                break;
            }
            buf.truncate(n);
            let Some(conn_id) = packet::peek_conn_id(&buf) else {
                self.pool.put(buf);
                continue;
            };
            let fl = packet::peek_flag(&buf);
            if fl & flag::SYN != 0 && fl & flag::ACK == 0 {
                self.handle_syn(addr).await;
                self.pool.put(buf);
                continue;
            }
            if fl & flag::SYN != 0 && fl & flag::ACK != 0 {
                if let Some(tx) = self.dialing.get(&addr) {
                    // 진행 중인 dial에 conn_id 전달
                    let _ = tx.try_send(conn_id);
                    self.pool.put(buf);
                    continue;
                }
                // 확립된 연결로 온 중복 SYN+ACK은 그대로 라우팅된다
            }
            match self.registry.get(&conn_id) {
                Some(tx) => {
                    if let Err(e) = tx.try_send(buf) {
                        // 스트림 포화/종료: 데이터그램 드랍 (RTO/FR이 복구)
                        debug!(conn_id, "inbound stream full, datagram dropped");
                        let buf = match e {
                            mpsc::error::TrySendError::Full(b) => b,
                            mpsc::error::TrySendError::Closed(b) => b,
                        };
                        self.pool.put(buf);
                    }
                }
                None => self.pool.put(buf),
            }
        }
    }

    /// 서버측 핸드쉐이크: 새 SYN이면 연결을 만들고, 중복이면 SYN+ACK 재전송
    async fn handle_syn(&self, addr: SocketAddr) {
        if let Some(id) = self.by_addr.get(&addr).map(|r| *r) {
            self.send_syn_ack(id, addr).await;
            return;
        }
        let conn_id = loop {
            let id: u32 = rand::random();
            if id != 0 && !self.registry.contains_key(&id) {
                break id;
            }
        };
        let conn = self.register_conn(conn_id, addr, DEFAULT_BOOTSTRAP_RTT);
        self.send_syn_ack(conn_id, addr).await;
        info!(%addr, conn_id, "connection accepted");
        if self.accept_tx.try_send(conn).is_err() {
            // 수락 대기열 포화: 연결 폐기
            warn!(%addr, "accept backlog full, connection dropped");
            self.registry.remove(&conn_id);
            self.by_addr.remove(&addr);
        }
    }

    async fn send_syn_ack(&self, conn_id: u32, addr: SocketAddr) {
        let mut pk = Packet::control(flag::SYN | flag::ACK, 0, 0);
        let buf = pk.marshall(conn_id, 1);
        if let Err(e) = self.sock.send_to(buf, addr).await {
            warn!(error = %e, "SYN+ACK send failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair(cfg: Config) -> (Endpoint, Endpoint) {
        let server = Endpoint::bind("127.0.0.1:0".parse().unwrap(), cfg.clone())
            .await
            .unwrap();
        let client = Endpoint::bind("127.0.0.1:0".parse().unwrap(), cfg)
            .await
            .unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_dial_accept_bidirectional() {
        let (server, client) = pair(Config::default()).await;
        let server_addr = server.local_addr().unwrap();

        let accepted = tokio::spawn(async move {
            let conn = server.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = conn.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ping");
            conn.write(b"pong").await.unwrap();
            (server, conn)
        });

        let conn = client.dial(server_addr).await.unwrap();
        conn.write(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");

        let (server, sconn) = accepted.await.unwrap();
        conn.close().await.unwrap();
        // 상대가 닫으면 읽기는 EOF
        let mut buf = [0u8; 16];
        assert!(matches!(sconn.read(&mut buf).await, Err(Error::Eof)));

        client.close();
        server.close();
    }

    #[tokio::test]
    async fn test_duplicate_syn_resends_syn_ack() {
        let server = Endpoint::bind("127.0.0.1:0".parse().unwrap(), Config::default())
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut syn = Packet::control(flag::SYN, 0, 0);
        let wire = syn.marshall(0, 1).to_vec();
        let mut buf = [0u8; 256];

        raw.send_to(&wire, server_addr).await.unwrap();
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), raw.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let first = packet::peek_conn_id(&buf[..n]).unwrap();
        assert!(first != 0);

        // 중복 SYN → 같은 conn_id의 SYN+ACK 재전송, 연결은 하나만 수락
        raw.send_to(&wire, server_addr).await.unwrap();
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), raw.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(packet::peek_conn_id(&buf[..n]), Some(first));

        let conn = tokio::time::timeout(Duration::from_secs(2), server.accept())
            .await
            .unwrap()
            .unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(300), server.accept())
            .await
            .is_err());
        drop(conn);
        server.close();
    }

    #[tokio::test]
    async fn test_clean_transfer_1mib() {
        let cfg = Config {
            bandwidth_mbps: 100,
            ..Config::default()
        };
        let (server, client) = pair(cfg).await;
        let server_addr = server.local_addr().unwrap();

        let total = 1024 * 1024;
        let data: Vec<u8> = (0..total).map(|i| (i * 31 % 251) as u8).collect();
        let expect = data.clone();

        let reader = tokio::spawn(async move {
            let conn = server.accept().await.unwrap();
            let mut got = Vec::with_capacity(total);
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match conn.read(&mut buf).await {
                    Ok(n) => got.extend_from_slice(&buf[..n]),
                    Err(Error::Eof) => break,
                    Err(e) => panic!("read: {e}"),
                }
            }
            let stats = conn.stats().await;
            (got, stats, server)
        });

        let conn = client.dial(server_addr).await.unwrap();
        // 4 KiB 청크 쓰기
        for chunk in data.chunks(4096) {
            conn.write(chunk).await.unwrap();
        }
        let _ = conn.close().await;
        let sender_stats = conn.stats().await;

        let (got, recv_stats, server) =
            tokio::time::timeout(Duration::from_secs(60), reader)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(got.len(), expect.len());
        assert_eq!(got, expect);
        // 무손실 링크: Fast Retransmit은 일어나지 않는다
        assert_eq!(sender_stats.f_r_cnt, 0);
        assert!(recv_stats.in_pk_cnt >= (total / crate::MSS) as u64);

        client.close();
        server.close();
    }
}
