//! suft-nc: 표준 입출력을 SUFT 스트림에 연결하는 netcat 스타일 도구
//!
//! stdin → 연결, 연결 → stdout 양방향 펌프. 한쪽 방향이 끝났을 때
//! `-w`초만큼 반대 방향을 기다렸다가 연결을 닫는다 (0이면 즉시 종료).
//!
//! 사용법:
//!   # 서버
//!   suft-nc -s -l 0.0.0.0:9000 > received.bin
//!
//!   # 클라이언트
//!   suft-nc -r 127.0.0.1:9000 -b 100 < file.bin

use std::net::SocketAddr;
use std::process::exit;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use suft::{Config, Conn, Endpoint};

/// 커맨드라인 설정
struct NcConfig {
    local: SocketAddr,
    remote: Option<SocketAddr>,
    server: bool,
    linger_secs: u64,
    config: Config,
}

impl Default for NcConfig {
    fn default() -> Self {
        Self {
            local: "0.0.0.0:0".parse().unwrap(),
            remote: None,
            server: false,
            linger_secs: 0,
            config: Config::default(),
        }
    }
}

fn parse_args() -> NcConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut nc = NcConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--local" | "-l" => {
                if i + 1 < args.len() {
                    nc.local = args[i + 1].parse().expect("유효한 로컬 주소 필요");
                    i += 1;
                }
            }
            "--remote" | "-r" => {
                if i + 1 < args.len() {
                    nc.remote = Some(args[i + 1].parse().expect("유효한 원격 주소 필요"));
                    i += 1;
                }
            }
            "--server" | "-s" => {
                nc.server = true;
            }
            "--bandwidth" | "-b" => {
                if i + 1 < args.len() {
                    nc.config.bandwidth_mbps = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--no-fr" => {
                nc.config.fast_retransmit = false;
            }
            "--super-retransmit" | "-sr" => {
                nc.config.super_retransmit = true;
            }
            "--debug" => {
                if i + 1 < args.len() {
                    nc.config.debug = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--wait" | "-w" => {
                if i + 1 < args.len() {
                    nc.linger_secs = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    "suft-nc - SUFT 프로토콜 netcat\n\n\
                     옵션:\n\
                     \x20 -l, --local <ADDR>      로컬 바인드 주소 (기본 0.0.0.0:0)\n\
                     \x20 -r, --remote <ADDR>     원격 주소 (클라이언트)\n\
                     \x20 -s, --server            서버 모드 (연결 수락)\n\
                     \x20 -b, --bandwidth <MBPS>  대역폭 설정 (기본 2)\n\
                     \x20     --no-fr             Fast Retransmit 비활성화\n\
                     \x20 -sr                     Super Retransmit (cwnd 반감 억제)\n\
                     \x20     --debug <0-3>       디버그 레벨\n\
                     \x20 -w, --wait <SECS>       반쪽 종료 대기 시간"
                );
                exit(0);
            }
            other => {
                eprintln!("알 수 없는 옵션: {other} (--help 참고)");
                exit(2);
            }
        }
        i += 1;
    }

    if !nc.server && nc.remote.is_none() {
        eprintln!("missing -r (--help 참고)");
        exit(2);
    }
    nc
}

/// stdin → 연결
async fn pump_in(conn: Conn, close_after: bool) -> std::io::Result<u64> {
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; 32 * 1024];
    let mut total = 0u64;
    loop {
        let n = stdin.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if conn.write(&buf[..n]).await.is_err() {
            break;
        }
        total += n as u64;
    }
    if close_after {
        let _ = conn.close().await;
    }
    Ok(total)
}

/// 연결 → stdout
async fn pump_out(conn: Conn, close_after: bool) -> std::io::Result<u64> {
    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; 32 * 1024];
    let mut total = 0u64;
    loop {
        match conn.read(&mut buf).await {
            Ok(n) => {
                stdout.write_all(&buf[..n]).await?;
                stdout.flush().await?;
                total += n as u64;
            }
            Err(_) => break,
        }
    }
    if close_after {
        let _ = conn.close().await;
    }
    Ok(total)
}

#[tokio::main]
async fn main() {
    let nc = parse_args();

    let level = if nc.config.debug == 0 {
        Level::INFO
    } else {
        Level::DEBUG
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("로거 초기화 실패");

    let endpoint = match Endpoint::bind(nc.local, nc.config.clone()).await {
        Ok(e) => e,
        Err(e) => {
            eprintln!("bind 실패: {e}");
            exit(1);
        }
    };

    let conn = if nc.server {
        info!(addr = %endpoint.local_addr().unwrap(), "listening");
        match endpoint.accept().await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("accept 실패: {e}");
                exit(1);
            }
        }
    } else {
        match endpoint.dial(nc.remote.unwrap()).await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("연결 실패: {e}");
                exit(1);
            }
        }
    };
    info!(remote = %conn.remote_addr(), "connected");

    let close_after = nc.linger_secs == 0;
    let mut up: JoinHandle<std::io::Result<u64>> =
        tokio::spawn(pump_in(conn.clone(), close_after));
    let mut down: JoinHandle<std::io::Result<u64>> =
        tokio::spawn(pump_out(conn.clone(), close_after));

    let second;
    tokio::select! {
        r = &mut up => {
            info!(result = ?r, "stdin 방향 종료");
            second = &mut down;
        }
        r = &mut down => {
            info!(result = ?r, "stdout 방향 종료");
            second = &mut up;
        }
    }

    if nc.linger_secs > 0 {
        if tokio::time::timeout(Duration::from_secs(nc.linger_secs), second)
            .await
            .is_err()
        {
            info!("대기 시간 만료, 연결 종료");
        }
        if let Err(e) = conn.close().await {
            warn!(error = %e, "close");
        }
    } else {
        // 남은 방향은 연결 종료(EOF)로 풀린다
        let _ = tokio::time::timeout(Duration::from_secs(2), second).await;
    }

    let stats = conn.stats().await;
    info!(%stats, "connection state");
    endpoint.close();
    // stdin 블로킹 스레드가 남아 있을 수 있으므로 즉시 종료
    exit(0);
}
