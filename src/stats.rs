//! 연결 통계

use std::fmt;

/// 연결 카운터와 윈도우 상태의 스냅샷
#[derive(Debug, Clone, Default)]
pub struct ConnStats {
    /// 송신 데이터 패킷 수
    pub out_pk_cnt: u64,

    /// 수신 데이터 패킷 수
    pub in_pk_cnt: u64,

    /// 중복 송신(재전송) 수
    pub out_dup_cnt: u64,

    /// 중복 수신 수
    pub in_dup_cnt: u64,

    /// Fast Retransmit 수행 수
    pub f_r_cnt: u64,

    /// 현재 혼잡 윈도우 (패킷)
    pub cwnd: i32,

    /// 현재 평활 송신 윈도우 (패킷)
    pub swnd: i32,

    /// 미확인 패킷 수
    pub out_pending: i32,

    /// 현재 rtt (ms)
    pub rtt: i64,

    /// 현재 rto (ms)
    pub rto: i64,
}

impl fmt::Display for ConnStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out={}/dup={} in={}/dup={} fr={} cwnd={} swnd={} pending={} rtt={}ms rto={}ms",
            self.out_pk_cnt,
            self.out_dup_cnt,
            self.in_pk_cnt,
            self.in_dup_cnt,
            self.f_r_cnt,
            self.cwnd,
            self.swnd,
            self.out_pending,
            self.rtt,
            self.rto,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_report() {
        let stats = ConnStats {
            out_pk_cnt: 10,
            in_pk_cnt: 4,
            out_dup_cnt: 1,
            f_r_cnt: 2,
            cwnd: 16,
            swnd: 32,
            rtt: 8,
            rto: 30,
            ..Default::default()
        };
        let s = stats.to_string();
        assert!(s.contains("out=10/dup=1"));
        assert!(s.contains("fr=2"));
        assert!(s.contains("rtt=8ms"));
    }
}
