//! 프로토콜 설정

use crate::MSS;

/// SUFT 프로토콜 설정
///
/// 엔드포인트 시작 이후에는 읽기 전용으로 취급되며 `Arc`로 공유된다.
#[derive(Debug, Clone)]
pub struct Config {
    /// 대역폭 (Mbps). swnd 상한 계산에 사용된다.
    pub bandwidth_mbps: i64,

    /// 디버그 레벨 (0 ~ 3)
    /// - 1: 추정기 갱신 로그
    /// - 2: ACK/SACK 처리 로그
    /// - 3: 패킷 송수신 로그
    pub debug: u8,

    /// Fast Retransmit 활성화
    pub fast_retransmit: bool,

    /// Super Retransmit: RTO 손실 시 cwnd 반감을 완전히 억제 (진단용)
    pub super_retransmit: bool,

    /// 데이터 패킷당 최대 페이로드 (바이트)
    pub mss: usize,

    /// 연결별 수신 이벤트 스트림 용량 (데이터그램 수)
    pub recv_channel_cap: usize,

    /// 데이터그램 버퍼 풀 크기 (버퍼 수)
    pub pool_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bandwidth_mbps: 2,        // suft-nc 기본값
            debug: 0,
            fast_retransmit: true,
            super_retransmit: false,
            mss: MSS,
            recv_channel_cap: 128,
            pool_capacity: 256,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 대역폭 (bits/sec)
    pub fn bandwidth_bps(&self) -> i64 {
        self.bandwidth_mbps * 1_000_000
    }

    /// 고대역 링크용 설정
    pub fn high_bandwidth() -> Self {
        Self {
            bandwidth_mbps: 100,
            recv_channel_cap: 512,
            pool_capacity: 1024,
            ..Self::default()
        }
    }

    /// 고손실 링크용 설정
    pub fn lossy_link() -> Self {
        Self {
            bandwidth_mbps: 10,
            fast_retransmit: true,
            recv_channel_cap: 256,
            pool_capacity: 512,
            ..Self::default()
        }
    }
}
