//! 에러 타입 정의

use thiserror::Error;

/// SUFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("스트림 종료 (EOF)")]
    Eof,

    #[error("IO 타임아웃: 데드라인 초과")]
    IoTimeout,

    #[error("연결 사망: FIN 재전송 한도 초과 또는 상대 도달 불가")]
    ConnectionDead,

    #[error("핸드쉐이크 실패: {attempts}회 재시도 후 응답 없음")]
    HandshakeFailed { attempts: u32 },

    #[error("내부 채널 종료")]
    ChannelClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
