use {
	crate::consts::STAFF_UID_LEN,
	serde::Serialize,
	std::fmt,
};

/// 消息发送方的身份，由 uid 长度区分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	Staff,
	Visitor,
}

impl Role {
	/// 不是客服 uid 的一律按访客处理
	pub fn from_uid(uid: &str) -> Self {
		if is_staff_uid(uid) { Role::Staff } else { Role::Visitor }
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Role::Staff => "staff",
			Role::Visitor => "visitor",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

pub fn is_staff_uid(uid: &str) -> bool {
	uid.len() == STAFF_UID_LEN
}
