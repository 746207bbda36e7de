use crate::geofile::feature::LayerId;

/// A dismissable message about a layer, e.g. a failed load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub layer_id: LayerId,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct NoticeBoard {
    notices: Vec<Notice>,
    next_id: u64,
}

impl NoticeBoard {
    /// Post a notice for `layer_id`, replacing the one it already has.
    pub fn push(&mut self, layer_id: LayerId, message: String) -> u64 {
        self.notices.retain(|notice| notice.layer_id != layer_id);
        self.next_id += 1;
        self.notices.push(Notice {
            id: self.next_id,
            layer_id,
            message,
        });
        self.next_id
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|notice| notice.id != id);
        self.notices.len() != before
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }
}

#[cfg(test)]
mod tests {
    use crate::geofile::feature::LayerId;

    use super::NoticeBoard;

    #[test]
    fn test_push_replaces_notice_of_same_layer() {
        let mut board = NoticeBoard::default();
        let first = board.push(LayerId::from("roads"), "timeout".to_string());
        board.push(LayerId::from("wells"), "status 500".to_string());
        let second = board.push(LayerId::from("roads"), "status 502".to_string());

        assert_ne!(first, second);
        assert_eq!(board.notices().len(), 2);
        assert!(!board.dismiss(first));
        let roads = board
            .notices()
            .iter()
            .find(|notice| notice.layer_id == LayerId::from("roads"))
            .unwrap();
        assert_eq!(roads.message, "status 502");
        assert!(board.dismiss(second));
        assert_eq!(board.notices().len(), 1);
    }
}
