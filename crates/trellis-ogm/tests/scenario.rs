//! End-to-end behaviour of the mapper on the embedded graph.

use std::sync::Arc;

use trellis_core::{ErrorKind, HasIdentity, OgmError, Properties, Registry, Value};
use trellis_graph::MemoryGraph;
use trellis_ogm::family::Person;
use trellis_ogm::{Mapper, Repository};

fn setup() -> (MemoryGraph, Mapper<MemoryGraph>, Repository<Person>) {
    let graph = MemoryGraph::new();
    let mapper = Mapper::new(graph.clone()).with_registry(Arc::new(Registry::new()));
    let people = mapper.repository::<Person>().unwrap();
    (graph, mapper, people)
}

/// Rick is Beth's father; Beth and Jerry are married with two children.
struct Smiths {
    rick: Person,
    beth: Person,
    jerry: Person,
    morty: Person,
    summer: Person,
}

async fn seed(mapper: &Mapper<MemoryGraph>, people: &Repository<Person>) -> Smiths {
    let mut session = mapper.session().await.unwrap();

    let mut elders = vec![Person::named("Rick Sanchez").aged(70), Person::named("Jerry Smith").aged(35)];
    people.save(&mut session, &mut elders).await.unwrap();
    let jerry = elders.pop().unwrap();
    let rick = elders.pop().unwrap();

    let mut beth = Person::named("Beth Smith").aged(34);
    beth.parents.set_one(rick.clone());
    beth.married_with.set_one(jerry.clone());
    people.save_one(&mut session, &mut beth).await.unwrap();

    let mut kids = vec![Person::named("Morty Smith").aged(14), Person::named("Summer Smith").aged(17)];
    for kid in &mut kids {
        kid.parents.set(vec![beth.clone(), jerry.clone()]);
    }
    people.save(&mut session, &mut kids).await.unwrap();
    let summer = kids.pop().unwrap();
    let morty = kids.pop().unwrap();

    session.commit().await.unwrap();
    Smiths {
        rick,
        beth,
        jerry,
        morty,
        summer,
    }
}

#[tokio::test]
async fn smith_family_round_trip() {
    let (graph, mapper, people) = setup();
    let smiths = seed(&mapper, &people).await;
    assert_eq!(graph.node_count(), 5);
    for person in [&smiths.rick, &smiths.beth, &smiths.jerry, &smiths.morty, &smiths.summer] {
        assert!(person.is_persisted(), "{}", person.name());
        assert!(person.identity.uuid.is_some());
    }

    let mut session = mapper.session().await.unwrap();
    let beth = people
        .search()
        .where_eq("name", "Beth Smith")
        .select("name,children.name")
        .unwrap()
        .single(&mut session)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(beth.identity, smiths.beth.identity);
    assert_eq!(beth.age, None);
    let mut children: Vec<&str> = beth.children.iter().map(Person::name).collect();
    children.sort();
    assert_eq!(children, ["Morty Smith", "Summer Smith"]);
    assert!(beth.parents.is_unloaded());

    let jerry = people
        .search()
        .where_eq("name", "Jerry Smith")
        .select("name,married_with.name,child_count")
        .unwrap()
        .single(&mut session)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jerry.married_with.first().map(Person::name), Some("Beth Smith"));
    assert_eq!(jerry.child_count, Some(2));

    let grandkids = people
        .search()
        .parse_filter("parents.name=Beth Smith")
        .unwrap()
        .order_by("age")
        .list(&mut session)
        .await
        .unwrap();
    let names: Vec<&str> = grandkids.iter().map(Person::name).collect();
    assert_eq!(names, ["Morty Smith", "Summer Smith"]);
}

#[tokio::test]
async fn lazy_parents_load_in_the_open_session() {
    let (_, mapper, people) = setup();
    let smiths = seed(&mapper, &people).await;

    let mut session = mapper.session().await.unwrap();
    let uuid = smiths.morty.identity.uuid.clone().unwrap();
    let mut morty = people.find_by_uuid(&mut session, &uuid).await.unwrap().unwrap();
    assert!(morty.parents.is_unloaded());

    people.fetch(&mut session, &mut morty, "parents").await.unwrap();
    let mut parents: Vec<&str> = morty.parents.iter().map(Person::name).collect();
    parents.sort();
    assert_eq!(parents, ["Beth Smith", "Jerry Smith"]);
}

#[tokio::test]
async fn missing_required_field_persists_nothing() {
    let (graph, mapper, people) = setup();
    let mut session = mapper.session().await.unwrap();

    let mut batch = vec![Person::named("Rick Sanchez"), Person::default().aged(3)];
    let err = people.save(&mut session, &mut batch).await.unwrap_err();
    assert!(matches!(&err, OgmError::MissingRequiredField { field, .. } if field == "name"));
    assert!(batch.iter().all(|p| !p.is_persisted()));
    assert!(session.is_rollback_only());

    let err = session.commit().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionAborted);
    assert_eq!(graph.node_count(), 0);

    let mut session = mapper.session().await.unwrap();
    assert_eq!(people.search().count(&mut session).await.unwrap(), 0);
}

#[tokio::test]
async fn edge_to_unsaved_entity_rolls_back_the_batch() {
    let (graph, mapper, people) = setup();
    let mut session = mapper.session().await.unwrap();

    let mut morty = Person::named("Morty Smith");
    morty.parents.set_one(Person::named("Beth Smith"));
    let mut batch = vec![Person::named("Summer Smith"), morty];
    let err = people.save(&mut session, &mut batch).await.unwrap_err();
    assert!(matches!(&err, OgmError::RelatedNotPersisted { field, .. } if field == "parents"));
    assert!(!batch[0].is_persisted());

    assert_eq!(session.commit().await.unwrap_err().kind(), ErrorKind::TransactionAborted);
    assert_eq!(graph.node_count(), 0);
    assert_eq!(graph.relationship_count(), 0);
}

#[tokio::test]
async fn unique_names_are_enforced() {
    let (_, mapper, people) = setup();
    let mut session = mapper.session().await.unwrap();
    people.save_one(&mut session, &mut Person::named("Rick Sanchez")).await.unwrap();
    session.commit().await.unwrap();

    let mut session = mapper.session().await.unwrap();
    let err = people
        .save_one(&mut session, &mut Person::named("Rick Sanchez"))
        .await
        .unwrap_err();
    assert!(matches!(&err, OgmError::DuplicateEntry { value, .. } if value == "Rick Sanchez"));
    session.rollback().await.unwrap();

    let mut session = mapper.session().await.unwrap();
    let mut twins = vec![Person::named("Morty Smith"), Person::named("Morty Smith")];
    let err = people.save(&mut session, &mut twins).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateEntry);
}

#[tokio::test]
async fn single_with_several_matches_is_ambiguous() {
    let (_, mapper, people) = setup();
    seed(&mapper, &people).await;

    let mut session = mapper.session().await.unwrap();
    let err = people
        .search()
        .parse_filter("name$=Smith")
        .unwrap()
        .single(&mut session)
        .await
        .unwrap_err();
    assert!(matches!(err, OgmError::AmbiguousResult { count: 4, .. }));

    let nobody = people.search().where_eq("name", "Mr. Poopybutthole").single(&mut session).await.unwrap();
    assert!(nobody.is_none());
}

#[tokio::test]
async fn paging_a_clone_leaves_the_original_alone() {
    let (_, mapper, people) = setup();
    seed(&mapper, &people).await;

    let mut session = mapper.session().await.unwrap();
    let base = people.search().order_by("age").limit(2).with_count();
    let last_page = base.clone().page(3);

    let first = base.execute(&mut session).await.unwrap();
    assert_eq!(first.total, Some(5));
    let names: Vec<String> = first.list.unwrap().iter().map(|p| p.name().to_string()).collect();
    assert_eq!(names, ["Morty Smith", "Summer Smith"]);

    let last = last_page.list(&mut session).await.unwrap();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].name(), "Rick Sanchez");
    assert_eq!(base.count(&mut session).await.unwrap(), 5);
    assert_eq!(base.params().page, 1);
}

#[tokio::test]
async fn describe_is_idempotent() {
    let (_, mapper, _) = setup();
    let first = mapper.describe::<Person>().unwrap();
    let second = mapper.describe::<Person>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(mapper.registry().by_label("Person").map(|d| d.label), Some("Person"));
}

#[tokio::test]
async fn remove_deletes_node_and_edges() {
    let (graph, mapper, people) = setup();
    let mut smiths = seed(&mapper, &people).await;
    assert_eq!(graph.relationship_count(), 6);

    let mut session = mapper.session().await.unwrap();
    assert!(people.remove(&mut session, &mut smiths.beth).await.unwrap());
    assert!(!smiths.beth.is_persisted());
    assert!(!people.remove(&mut session, &mut smiths.beth).await.unwrap());
    session.commit().await.unwrap();

    assert_eq!(graph.node_count(), 4);
    // Only Jerry's two ChildOf edges are left.
    assert_eq!(graph.relationship_count(), 2);
}

#[tokio::test]
async fn edge_properties_are_written_and_read() {
    let (_, mapper, people) = setup();
    let smiths = seed(&mapper, &people).await;

    let mut session = mapper.session().await.unwrap();
    let mut years = Properties::new();
    years.insert("years".to_string(), Value::from(17));
    people
        .save_relationship(&mut session, &smiths.beth, "married_with", &smiths.jerry.identity, years)
        .await
        .unwrap();
    session.commit().await.unwrap();

    let mut session = mapper.session().await.unwrap();
    let documents = people
        .search()
        .where_eq("name", "Beth Smith")
        .select("married_with.name")
        .unwrap()
        .documents(&mut session)
        .await
        .unwrap();
    let spouse = &documents[0].related("married_with")[0];
    assert_eq!(spouse.get("name"), Some(&Value::from("Jerry Smith")));
    assert_eq!(spouse.edge.as_ref().and_then(|e| e.get("years")), Some(&Value::Int(17)));
}

#[tokio::test]
async fn single_relationship_is_replaced() {
    let (_, mapper, people) = setup();
    let mut smiths = seed(&mapper, &people).await;

    let mut session = mapper.session().await.unwrap();
    smiths.beth.married_with.set_one(smiths.rick.clone());
    people.save_one(&mut session, &mut smiths.beth).await.unwrap();
    session.commit().await.unwrap();

    let mut session = mapper.session().await.unwrap();
    let spouses = |name: &'static str| people.search().where_eq("name", name).select("married_with.name");
    let beth = spouses("Beth Smith").unwrap().single(&mut session).await.unwrap().unwrap();
    assert_eq!(beth.married_with.first().map(Person::name), Some("Rick Sanchez"));
    let jerry = spouses("Jerry Smith").unwrap().single(&mut session).await.unwrap().unwrap();
    assert!(jerry.married_with.is_loaded());
    assert!(jerry.married_with.is_empty());
}

#[tokio::test]
async fn unloaded_relationships_are_untouched_and_clear_removes_them() {
    let (graph, mapper, people) = setup();
    let smiths = seed(&mapper, &people).await;
    let uuid = smiths.morty.identity.uuid.clone().unwrap();

    let mut session = mapper.session().await.unwrap();
    let mut morty = people.find_by_uuid(&mut session, &uuid).await.unwrap().unwrap();
    morty.age = Some(15);
    people.save_one(&mut session, &mut morty).await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(graph.relationship_count(), 6);

    let mut session = mapper.session().await.unwrap();
    morty.parents.clear();
    people.save_one(&mut session, &mut morty).await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(graph.relationship_count(), 4);

    let mut session = mapper.session().await.unwrap();
    let mut morty = people.find_by_uuid(&mut session, &uuid).await.unwrap().unwrap();
    assert_eq!(morty.age, Some(15));
    people.fetch(&mut session, &mut morty, "parents").await.unwrap();
    assert!(morty.parents.is_empty());
}

#[tokio::test]
async fn updates_validate_and_remove_nulled_properties() {
    let (_, mapper, people) = setup();
    let mut smiths = seed(&mapper, &people).await;

    let mut session = mapper.session().await.unwrap();
    smiths.summer.age = None;
    people.save_one(&mut session, &mut smiths.summer).await.unwrap();
    session.commit().await.unwrap();

    let mut session = mapper.session().await.unwrap();
    let id = smiths.summer.identity.id.unwrap();
    let summer = people.find_by_id(&mut session, id).await.unwrap().unwrap();
    assert_eq!(summer.age, None);
    assert_eq!(summer.name(), "Summer Smith");

    smiths.summer.name = Some("  ".to_string());
    let err = people.save_one(&mut session, &mut smiths.summer).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingRequiredField);
    assert!(smiths.summer.is_persisted());
}

#[tokio::test]
async fn whitespace_names_count_as_missing() {
    let (graph, mapper, people) = setup();
    let mut session = mapper.session().await.unwrap();
    let mut nobody = Person::named("   ");
    let err = people.save_one(&mut session, &mut nobody).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingRequiredField);
    assert!(!nobody.is_persisted());
    assert_eq!(graph.node_count(), 0);
}

#[tokio::test]
async fn saving_a_partial_load_keeps_unselected_properties() {
    let (_, mapper, people) = setup();
    let smiths = seed(&mapper, &people).await;
    let uuid = smiths.rick.identity.uuid.clone().unwrap();

    let mut session = mapper.session().await.unwrap();
    let mut rick = people
        .search()
        .where_eq("name", "Rick Sanchez")
        .select("name")
        .unwrap()
        .single(&mut session)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rick.age, None);
    rick.name = Some("Rick C-137".to_string());
    people.save_one(&mut session, &mut rick).await.unwrap();
    session.commit().await.unwrap();

    let mut session = mapper.session().await.unwrap();
    let stored = people.find_by_uuid(&mut session, &uuid).await.unwrap().unwrap();
    assert_eq!(stored.name(), "Rick C-137");
    assert_eq!(stored.age, Some(70));

    let mut rick = people
        .search()
        .uuids([uuid.as_str()])
        .select("name,age")
        .unwrap()
        .single(&mut session)
        .await
        .unwrap()
        .unwrap();
    rick.age = None;
    people.save_one(&mut session, &mut rick).await.unwrap();
    session.commit().await.unwrap();

    let mut session = mapper.session().await.unwrap();
    let stored = people.find_by_uuid(&mut session, &uuid).await.unwrap().unwrap();
    assert_eq!(stored.age, None);
}

#[tokio::test]
async fn operations_without_a_transaction_fail() {
    let (_, _, people) = setup();
    let mut detached = trellis_ogm::Session::<trellis_graph::MemoryTxn>::detached();
    let err = people.search().count(&mut detached).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoActiveTransaction);
    let err = people
        .save_one(&mut detached, &mut Person::named("Squanchy"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoActiveTransaction);
}

#[tokio::test]
async fn scalar_properties_can_be_removed() {
    let (_, mapper, people) = setup();
    let mut smiths = seed(&mapper, &people).await;

    let mut session = mapper.session().await.unwrap();
    people.remove_property(&mut session, &mut smiths.rick, "age").await.unwrap();
    assert_eq!(smiths.rick.age, None);
    let err = people
        .remove_property(&mut session, &mut smiths.rick, "name")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingRequiredField);
    let err = people
        .remove_property(&mut session, &mut smiths.rick, "children")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFieldPath);
    session.commit().await.unwrap();

    let mut session = mapper.session().await.unwrap();
    let rick = people
        .find_by_uuid(&mut session, smiths.rick.identity.uuid.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rick.age, None);
    assert_eq!(rick.name(), "Rick Sanchez");
}

#[tokio::test]
async fn family_saved_first_and_linked_afterwards() {
    let (graph, mapper, people) = setup();

    let mut session = mapper.session().await.unwrap();
    let mut family: Vec<Person> = ["Rick Sanchez", "Beth Smith", "Jerry Smith", "Morty Smith", "Summer Smith"]
        .into_iter()
        .map(Person::named)
        .collect();
    people.save(&mut session, &mut family).await.unwrap();
    assert!(family.iter().all(|p| p.identity.id.is_some() && p.identity.uuid.is_some()));
    assert_eq!(graph.relationship_count(), 0);

    let (morty, summer, jerry) = (family[3].clone(), family[4].clone(), family[2].clone());
    let beth = &mut family[1];
    beth.children.set(vec![morty, summer]);
    beth.married_with.set_one(jerry);
    people.save_one(&mut session, beth).await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(graph.relationship_count(), 3);

    let mut session = mapper.session().await.unwrap();
    let beth = people
        .search()
        .where_eq("name", "Beth Smith")
        .fields("name,children.name".parse().unwrap())
        .single(&mut session)
        .await
        .unwrap()
        .unwrap();
    let mut children: Vec<&str> = beth.children.iter().map(Person::name).collect();
    children.sort();
    assert_eq!(children, ["Morty Smith", "Summer Smith"]);
}
