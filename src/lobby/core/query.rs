use super::session::LobbySession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryField {
    AvailableSlots,
    MaxPlayers,
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Eq,
    Gt,
    Ge,
    Lt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
    pub field: QueryField,
    pub op: QueryOp,
    pub value: u64,
}

impl QueryFilter {
    pub fn new(field: QueryField, op: QueryOp, value: u64) -> Self {
        Self { field, op, value }
    }

    pub fn matches(&self, lobby: &LobbySession) -> bool {
        let actual = field_value(lobby, self.field);
        match self.op {
            QueryOp::Eq => actual == self.value,
            QueryOp::Gt => actual > self.value,
            QueryOp::Ge => actual >= self.value,
            QueryOp::Lt => actual < self.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOrder {
    pub field: QueryField,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub count: usize,
    pub filters: Vec<QueryFilter>,
    pub order: Vec<QueryOrder>,
}

impl QueryOptions {
    /// Open lobbies only, newest first.
    pub fn open_lobbies(count: usize) -> Self {
        Self {
            count,
            filters: vec![QueryFilter::new(QueryField::AvailableSlots, QueryOp::Gt, 0)],
            order: vec![QueryOrder {
                field: QueryField::Created,
                ascending: false,
            }],
        }
    }

    pub fn matches(&self, lobby: &LobbySession) -> bool {
        self.filters.iter().all(|f| f.matches(lobby))
    }

    /// Filter, order and truncate a result set in place.
    pub fn apply(&self, lobbies: &mut Vec<LobbySession>) {
        lobbies.retain(|l| self.matches(l));
        lobbies.sort_by(|a, b| {
            self.order
                .iter()
                .map(|o| {
                    let ord = field_value(a, o.field).cmp(&field_value(b, o.field));
                    if o.ascending { ord } else { ord.reverse() }
                })
                .find(|ord| ord.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        lobbies.truncate(self.count);
    }
}

fn field_value(lobby: &LobbySession, field: QueryField) -> u64 {
    match field {
        QueryField::AvailableSlots => lobby.available_slots() as u64,
        QueryField::MaxPlayers => lobby.capacity as u64,
        QueryField::Created => lobby.created_at,
    }
}
