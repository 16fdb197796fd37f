use std::cmp::Ordering;
use std::fmt;

/// One of the six NAT-behavior classes a client can be classified into.
///
/// Ordered by the lattice in the classification protocol: more
/// "informative" classes compare greater than less informative ones, so
/// [`merge`] can just take the maximum of two observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NatClass {
    Blocked,
    Symmetric,
    RestrictedPort,
    Restricted,
    FullCone,
    OpenInternet,
}

impl NatClass {
    fn rank(self) -> u8 {
        match self {
            Self::Blocked => 0,
            Self::Symmetric => 1,
            Self::RestrictedPort => 2,
            Self::Restricted => 3,
            Self::FullCone => 4,
            Self::OpenInternet => 5,
        }
    }

    /// Tag carried by a probe `ServerRequest`. Only the three classes a
    /// probe can attribute carry one; the probe tag namespace is disjoint
    /// from the client-request tag namespace (see `message::RequestType`).
    pub fn probe_tag(self) -> Option<&'static str> {
        match self {
            Self::FullCone => Some("Full Cone"),
            Self::Restricted => Some("Restricted NAT"),
            Self::RestrictedPort => Some("Restricted Port NAT"),
            _ => None,
        }
    }

    pub fn from_probe_tag(tag: &str) -> Option<Self> {
        match tag {
            "Full Cone" => Some(Self::FullCone),
            "Restricted NAT" => Some(Self::Restricted),
            "Restricted Port NAT" => Some(Self::RestrictedPort),
            _ => None,
        }
    }
}

impl fmt::Display for NatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenInternet => "Open Internet",
            Self::FullCone => "Full Cone",
            Self::Restricted => "Restricted NAT",
            Self::RestrictedPort => "Restricted Port NAT",
            Self::Symmetric => "Symmetric NAT",
            Self::Blocked => "Blocked",
        })
    }
}

impl PartialOrd for NatClass {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NatClass {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl Default for NatClass {
    fn default() -> Self {
        Self::Blocked
    }
}

/// Monotone merge of two NAT-class observations: yields the more
/// informative of the two. Pure, total, associative, commutative and
/// idempotent by construction (it is just `max` over the lattice order).
pub fn merge(a: NatClass, b: NatClass) -> NatClass {
    a.max(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [NatClass; 6] = [
        NatClass::OpenInternet,
        NatClass::FullCone,
        NatClass::Restricted,
        NatClass::RestrictedPort,
        NatClass::Symmetric,
        NatClass::Blocked,
    ];

    #[test]
    fn merge_is_commutative() {
        for &a in &ALL {
            for &b in &ALL {
                assert_eq!(merge(a, b), merge(b, a));
            }
        }
    }

    #[test]
    fn merge_is_idempotent() {
        for &a in &ALL {
            assert_eq!(merge(a, a), a);
        }
    }

    #[test]
    fn merge_is_associative() {
        for &a in &ALL {
            for &b in &ALL {
                for &c in &ALL {
                    assert_eq!(merge(merge(a, b), c), merge(a, merge(b, c)));
                }
            }
        }
    }

    #[test]
    fn blocked_is_identity() {
        for &x in &ALL {
            assert_eq!(merge(NatClass::Blocked, x), x);
        }
    }

    #[test]
    fn open_internet_is_absorbing() {
        for &x in &ALL {
            assert_eq!(merge(NatClass::OpenInternet, x), NatClass::OpenInternet);
        }
    }

    #[test]
    fn precedence_order() {
        assert!(NatClass::OpenInternet > NatClass::FullCone);
        assert!(NatClass::FullCone > NatClass::Restricted);
        assert!(NatClass::Restricted > NatClass::RestrictedPort);
        assert!(NatClass::RestrictedPort > NatClass::Symmetric);
        assert!(NatClass::Symmetric > NatClass::Blocked);
    }

    #[test]
    fn probe_tag_roundtrip() {
        for class in [NatClass::FullCone, NatClass::Restricted, NatClass::RestrictedPort] {
            let tag = class.probe_tag().unwrap();
            assert_eq!(NatClass::from_probe_tag(tag), Some(class));
        }
    }
}
