use std::collections::{HashMap, VecDeque};

use crate::component::{ActionId, ConnectionId, LinkId, LinkProperties, Timestamp};
use crate::framing::ProducerId;
use crate::package::PackageId;

/// One covert pathway. Holds only ids into the action and package stores;
/// the stores own the records (the object graph would otherwise be cyclic).
#[derive(Debug, Clone)]
pub struct Link {
    pub link_id: LinkId,
    pub producer_id: ProducerId,
    pub properties: LinkProperties,
    /// Counter stamped onto outgoing fragment frames; wraps.
    pub next_fragment_id: u32,
    pub connections: Vec<ConnectionId>,
    /// Upcoming actions targeting this link, in store order. Wildcard
    /// actions appear in every link's queue until committed.
    pub action_queue: Vec<ActionId>,
    /// Outbound packages in enqueue order.
    pub package_queue: VecDeque<PackageId>,
}

impl Link {
    pub fn new(link_id: LinkId) -> Self {
        Link {
            link_id,
            producer_id: ProducerId::generate(),
            properties: LinkProperties::default(),
            next_fragment_id: 1,
            connections: Vec::new(),
            action_queue: Vec::new(),
            package_queue: VecDeque::new(),
        }
    }

    /// Takes the next outgoing fragment-frame id. Wraps on overflow so
    /// long-lived links keep working.
    pub fn take_fragment_id(&mut self) -> u32 {
        let id = self.next_fragment_id;
        self.next_fragment_id = self.next_fragment_id.wrapping_add(1);
        id
    }
}

/// One logical flow over a link.
#[derive(Debug, Clone)]
pub struct Connection {
    pub connection_id: ConnectionId,
    pub link_id: LinkId,
    pub send_timeout: Option<Timestamp>,
}

/// Id-keyed tables for links and connections.
#[derive(Debug, Default)]
pub struct LinkTable {
    links: HashMap<LinkId, Link>,
    connections: HashMap<ConnectionId, Connection>,
}

impl LinkTable {
    pub fn new() -> Self {
        LinkTable::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, link_id: &LinkId) -> bool {
        self.links.contains_key(link_id)
    }

    pub fn get(&self, link_id: &LinkId) -> Option<&Link> {
        self.links.get(link_id)
    }

    pub fn get_mut(&mut self, link_id: &LinkId) -> Option<&mut Link> {
        self.links.get_mut(link_id)
    }

    pub fn insert(&mut self, link: Link) {
        self.links.insert(link.link_id.clone(), link);
    }

    /// Removes a link and every connection riding on it. Returns the link
    /// and the removed connection ids.
    pub fn remove(&mut self, link_id: &LinkId) -> Option<(Link, Vec<ConnectionId>)> {
        let link = self.links.remove(link_id)?;
        let mut closed = Vec::new();
        self.connections.retain(|conn_id, conn| {
            if conn.link_id == *link_id {
                closed.push(conn_id.clone());
                false
            } else {
                true
            }
        });
        Some((link, closed))
    }

    pub fn link_ids(&self) -> Vec<LinkId> {
        let mut ids: Vec<LinkId> = self.links.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Link> {
        self.links.values_mut()
    }

    pub fn connection(&self, connection_id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(connection_id)
    }

    pub fn open_connection(&mut self, connection: Connection) {
        if let Some(link) = self.links.get_mut(&connection.link_id) {
            link.connections.push(connection.connection_id.clone());
        }
        self.connections
            .insert(connection.connection_id.clone(), connection);
    }

    pub fn close_connection(&mut self, connection_id: &ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(connection_id)?;
        if let Some(link) = self.links.get_mut(&connection.link_id) {
            link.connections.retain(|c| c != connection_id);
        }
        Some(connection)
    }

    /// Open connections on a link, the fan-out set for inbound packages.
    pub fn connections_on(&self, link_id: &LinkId) -> Vec<ConnectionId> {
        self.links
            .get(link_id)
            .map(|link| link.connections.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_remove_link_closes_connections() {
        let mut table = LinkTable::new();
        table.insert(Link::new("link-1".into()));
        table.open_connection(Connection {
            connection_id: "conn-1".into(),
            link_id: "link-1".into(),
            send_timeout: None,
        });
        table.open_connection(Connection {
            connection_id: "conn-2".into(),
            link_id: "link-1".into(),
            send_timeout: None,
        });

        assert_eq!(
            table.connections_on(&"link-1".into()),
            vec!["conn-1", "conn-2"]
        );

        let (_, closed) = table.remove(&"link-1".into()).expect("remove");
        assert_eq!(closed.len(), 2);
        assert!(table.connection(&"conn-1".into()).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_link_ids_sorted() {
        let mut table = LinkTable::new();
        table.insert(Link::new("link-b".into()));
        table.insert(Link::new("link-a".into()));
        assert_eq!(table.link_ids(), vec!["link-a", "link-b"]);
    }

    #[test]
    fn test_fragment_id_wraps() {
        let mut link = Link::new("link-1".into());
        link.next_fragment_id = u32::MAX;
        assert_eq!(link.take_fragment_id(), u32::MAX);
        assert_eq!(link.take_fragment_id(), 0);
        assert_eq!(link.take_fragment_id(), 1);
    }
}
