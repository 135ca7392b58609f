//! 时段与每日一次的问候标志

use chrono::Timelike;
use serde::{Deserialize, Serialize};

/// 五个问候时段（按优先级排列）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeOfDay {
    Dawn,
    Morning,
    Lunch,
    Evening,
    Night,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 5] = [
        TimeOfDay::Dawn,
        TimeOfDay::Morning,
        TimeOfDay::Lunch,
        TimeOfDay::Evening,
        TimeOfDay::Night,
    ];

    /// 左闭右开的小时区间；Night 跨越午夜
    pub fn hours(self) -> HourRange {
        match self {
            TimeOfDay::Dawn => HourRange::new(1, 5),
            TimeOfDay::Morning => HourRange::new(7, 12),
            TimeOfDay::Lunch => HourRange::new(12, 14),
            TimeOfDay::Evening => HourRange::new(18, 22),
            TimeOfDay::Night => HourRange::new(22, 1),
        }
    }

    /// 交给角色的话题描述
    pub fn topic(self) -> &'static str {
        match self {
            TimeOfDay::Dawn => "The user is still awake or up very early. Wonder why they are awake, or worry about their health.",
            TimeOfDay::Morning => "Greet the user good morning and cheer them on for the day.",
            TimeOfDay::Lunch => "Remind the user it is lunchtime or ask whether they have eaten.",
            TimeOfDay::Evening => "Tell the user it is evening and ask how their day went, or thank them for their hard work.",
            TimeOfDay::Night => "Remind the user it is time to sleep and wish them a good night.",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

impl HourRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// 当天各时段是否已问候
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DailyGreetings {
    dawn: bool,
    morning: bool,
    lunch: bool,
    evening: bool,
    night: bool,
}

impl DailyGreetings {
    fn flag_mut(&mut self, slot: TimeOfDay) -> &mut bool {
        match slot {
            TimeOfDay::Dawn => &mut self.dawn,
            TimeOfDay::Morning => &mut self.morning,
            TimeOfDay::Lunch => &mut self.lunch,
            TimeOfDay::Evening => &mut self.evening,
            TimeOfDay::Night => &mut self.night,
        }
    }

    pub fn has_fired(&self, slot: TimeOfDay) -> bool {
        match slot {
            TimeOfDay::Dawn => self.dawn,
            TimeOfDay::Morning => self.morning,
            TimeOfDay::Lunch => self.lunch,
            TimeOfDay::Evening => self.evening,
            TimeOfDay::Night => self.night,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 找到第一个覆盖 now 且今天尚未问候的时段，标记为已问候并返回
    pub fn take_due<T: Timelike>(&mut self, now: &T) -> Option<TimeOfDay> {
        let hour = now.hour();
        let slot = TimeOfDay::ALL
            .into_iter()
            .find(|s| s.hours().contains(hour) && !self.has_fired(*s))?;
        *self.flag_mut(slot) = true;
        Some(slot)
    }
}

/// 随机事件类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RandomEvent {
    Compliment,
    Question,
    Joke,
    Encouragement,
}

impl RandomEvent {
    pub const ALL: [RandomEvent; 4] = [
        RandomEvent::Compliment,
        RandomEvent::Question,
        RandomEvent::Joke,
        RandomEvent::Encouragement,
    ];

    pub fn topic(self) -> &'static str {
        match self {
            RandomEvent::Compliment => "Compliment the user for no particular reason, or talk about something good about them.",
            RandomEvent::Question => "Casually ask about the user's hobbies, recent interests or favourite things.",
            RandomEvent::Joke => "Tell a pun or a short joke that fits your personality.",
            RandomEvent::Encouragement => "Assume the user might be tired of something and cheer them up.",
        }
    }
}

/// 自主群聊的开场话题
pub const GROUP_CHAT_TOPICS: [&str; 4] = [
    "What is everyone up to? I'm bored.",
    "Can someone recommend what to eat for dinner tonight?",
    "Seen any good movies or shows lately?",
    "Random thought: what do you all think our group's goal is?",
];

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn at(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn test_night_wraps_midnight() {
        let night = TimeOfDay::Night.hours();
        assert!(night.contains(22));
        assert!(night.contains(23));
        assert!(night.contains(0));
        assert!(!night.contains(1));
        assert!(!night.contains(21));
    }

    #[test]
    fn test_each_slot_fires_once() {
        let mut g = DailyGreetings::default();
        assert_eq!(g.take_due(&at(8)), Some(TimeOfDay::Morning));
        assert_eq!(g.take_due(&at(9)), None);
        assert_eq!(g.take_due(&at(12)), Some(TimeOfDay::Lunch));
        assert_eq!(g.take_due(&at(15)), None);
        assert_eq!(g.take_due(&at(6)), None);
        g.reset();
        assert_eq!(g.take_due(&at(9)), Some(TimeOfDay::Morning));
    }

    #[test]
    fn test_dawn_boundaries() {
        let mut g = DailyGreetings::default();
        assert_eq!(g.take_due(&at(5)), None);
        assert_eq!(g.take_due(&at(0)), Some(TimeOfDay::Night));
        assert_eq!(g.take_due(&at(1)), Some(TimeOfDay::Dawn));
    }
}
