//! `trellis demo`: the Smith family, end to end.

use trellis_core::{Properties, Value};
use trellis_graph::GraphStore;

use trellis_ogm::family::Person;
use trellis_ogm::Mapper;

pub async fn run<S: GraphStore>(mapper: &Mapper<S>) -> anyhow::Result<()> {
    mapper.describe::<Person>()?;
    mapper.ensure_schema().await?;
    let people = mapper.repository::<Person>()?;

    let mut session = mapper.session().await?;
    let mut rick = Person::named("Rick Sanchez").aged(70);
    people.save_one(&mut session, &mut rick).await?;

    let mut jerry = Person::named("Jerry Smith").aged(35);
    people.save_one(&mut session, &mut jerry).await?;

    let mut beth = Person::named("Beth Smith").aged(34);
    beth.parents.set_one(rick.clone());
    beth.married_with.set_one(jerry.clone());
    people.save_one(&mut session, &mut beth).await?;

    let mut kids = vec![Person::named("Morty Smith").aged(14), Person::named("Summer Smith").aged(17)];
    for kid in &mut kids {
        kid.parents.set(vec![beth.clone(), jerry.clone()]);
    }
    people.save(&mut session, &mut kids).await?;

    let mut years = Properties::new();
    years.insert("years".to_string(), Value::from(17));
    people.save_relationship(&mut session, &beth, "married_with", &jerry.identity, years).await?;
    session.commit().await?;
    tracing::info!("Seeded the Smith family");

    let mut session = mapper.session().await?;
    let beth = people
        .search()
        .where_eq("name", "Beth Smith")
        .select("name,age,child_count,children.name,married_with.name")?
        .documents(&mut session)
        .await?;
    println!("{}", serde_json::to_string_pretty(&beth)?);

    let smiths = people
        .search()
        .parse_filter("name$=Smith")?
        .order_by_desc("age")
        .limit(2)
        .with_count()
        .execute(&mut session)
        .await?;
    println!("{}", serde_json::to_string_pretty(&smiths)?);

    session.rollback().await?;
    Ok(())
}
