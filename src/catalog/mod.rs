//! Static channel catalog
//!
//! The assembly broadcasts a fixed set of committee channels. The catalog
//! maps each channel id to its on-air status code (`adCode`) and HLS
//! playlist URL. Constant for the process lifetime; lookup misses are
//! `None`, never errors.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    pub id: &'static str,
    pub name: &'static str,
    pub code: &'static str,
    pub stream_url: &'static str,
}

pub const CHANNELS: &[Channel] = &[
    Channel {
        id: "ch14",
        name: "본회의",
        code: "A011",
        stream_url: "https://stream01.cdn.gov-ntruss.com/live/ch14/playlist.m3u8",
    },
    Channel {
        id: "ch1",
        name: "의회운영위원회",
        code: "C001",
        stream_url: "https://stream01.cdn.gov-ntruss.com/live/ch1/playlist.m3u8",
    },
    Channel {
        id: "ch3",
        name: "기획재정위원회",
        code: "C105",
        stream_url: "https://stream02.cdn.gov-ntruss.com/live/ch3/playlist.m3u8",
    },
    Channel {
        id: "ch6",
        name: "경제노동위원회",
        code: "C205",
        stream_url: "https://stream02.cdn.gov-ntruss.com/live/ch6/playlist.m3u8",
    },
    Channel {
        id: "ch7",
        name: "안전행정위원회",
        code: "C301",
        stream_url: "https://stream02.cdn.gov-ntruss.com/live/ch7/playlist.m3u8",
    },
    Channel {
        id: "ch8",
        name: "문화체육관광위원회",
        code: "C501",
        stream_url: "https://stream01.cdn.gov-ntruss.com/live/ch8/playlist.m3u8",
    },
    Channel {
        id: "ch15",
        name: "농정해양위원회",
        code: "C601",
        stream_url: "https://stream01.cdn.gov-ntruss.com/live/ch15/playlist.m3u8",
    },
    Channel {
        id: "ch2",
        name: "보건복지위원회",
        code: "C701",
        stream_url: "https://stream02.cdn.gov-ntruss.com/live/ch2/playlist.m3u8",
    },
    Channel {
        id: "ch12",
        name: "건설교통위원회",
        code: "C807",
        stream_url: "https://stream01.cdn.gov-ntruss.com/live/ch12/playlist.m3u8",
    },
    Channel {
        id: "ch13",
        name: "도시환경위원회",
        code: "C901",
        stream_url: "https://stream01.cdn.gov-ntruss.com/live/ch13/playlist.m3u8",
    },
    Channel {
        id: "ch16",
        name: "미래과학협력위원회",
        code: "C9043",
        stream_url: "https://stream01.cdn.gov-ntruss.com/live/ch16/playlist.m3u8",
    },
    Channel {
        id: "ch11",
        name: "여성가족평생교육위원회",
        code: "C905",
        stream_url: "https://stream01.cdn.gov-ntruss.com/live/ch11/playlist.m3u8",
    },
    Channel {
        id: "ch4",
        name: "교육기획위원회",
        code: "C908",
        stream_url: "https://stream02.cdn.gov-ntruss.com/live/ch4/playlist.m3u8",
    },
    Channel {
        id: "ch5",
        name: "교육행정위원회",
        code: "C909",
        stream_url: "https://stream01.cdn.gov-ntruss.com/live/ch5/playlist.m3u8",
    },
    Channel {
        id: "ch60",
        name: "경기도청 예산결산특별위원회",
        code: "E020",
        stream_url: "https://stream01.cdn.gov-ntruss.com/live/ch60/playlist.m3u8",
    },
    Channel {
        id: "ch61",
        name: "경기도교육청 예산결산특별위원회",
        code: "E030",
        stream_url: "https://stream01.cdn.gov-ntruss.com/live/ch61/playlist.m3u8",
    },
    Channel {
        id: "ch10",
        name: "행정사무조사",
        code: "E040",
        stream_url: "https://stream01.cdn.gov-ntruss.com/live/ch10/playlist.m3u8",
    },
    Channel {
        id: "ch90",
        name: "도의회 북부분원",
        code: "E050",
        stream_url: "https://stream02.cdn.gov-ntruss.com/live2/ch90/playlist.m3u8",
    },
];

pub fn all() -> &'static [Channel] {
    CHANNELS
}

pub fn by_id(channel_id: &str) -> Option<&'static Channel> {
    CHANNELS.iter().find(|ch| ch.id == channel_id)
}

pub fn by_code(code: &str) -> Option<&'static Channel> {
    CHANNELS.iter().find(|ch| ch.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id_and_code() {
        let ch = by_id("ch14").unwrap();
        assert_eq!(ch.code, "A011");
        assert_eq!(ch.name, "본회의");

        let ch = by_code("A011").unwrap();
        assert_eq!(ch.id, "ch14");
    }

    #[test]
    fn unknown_lookups_are_none() {
        assert!(by_id("ch999").is_none());
        assert!(by_code("Z999").is_none());
    }

    #[test]
    fn ids_and_codes_are_unique() {
        use std::collections::HashSet;
        let ids: HashSet<_> = CHANNELS.iter().map(|c| c.id).collect();
        let codes: HashSet<_> = CHANNELS.iter().map(|c| c.code).collect();
        assert_eq!(ids.len(), CHANNELS.len());
        assert_eq!(codes.len(), CHANNELS.len());
    }
}
