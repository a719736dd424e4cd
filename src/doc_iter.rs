use crate::error::Result;
use crate::seg::TermPostings;

/// Iterates matching segment-local ordinals in ascending order, scoring the
/// current one.
pub trait DocIter {
    fn current_doc(&self) -> Option<u32>;
    fn next_doc(&mut self) -> Result<Option<u32>>;
    fn advance(&mut self, target: u32) -> Result<Option<u32>> {
        loop {
            let next = self.next_doc()?;
            match next {
                Some(doc) => {
                    if doc < target {
                        continue;
                    } else {
                        return Ok(Some(doc));
                    }
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }
    fn score(&self) -> f32;
}

/// Postings of one term, scored as `sqrt(tf) * weight * posting boost`.
pub struct TermDocIter<'a> {
    postings: TermPostings<'a>,
    weight: f32,
}

impl<'a> TermDocIter<'a> {
    pub fn new(postings: TermPostings<'a>, weight: f32) -> TermDocIter<'a> {
        TermDocIter { postings, weight }
    }
}

impl<'a> DocIter for TermDocIter<'a> {
    fn current_doc(&self) -> Option<u32> {
        self.postings.ordinal()
    }

    fn next_doc(&mut self) -> Result<Option<u32>> {
        self.postings.next_posting()
    }

    fn score(&self) -> f32 {
        (self.postings.freq() as f32).sqrt() * self.weight * self.postings.boost()
    }
}

/// Conjunction. Scores are summed.
pub struct AllDocIter<'a> {
    sub: Vec<Box<dyn DocIter + 'a>>,
    current_doc: Option<u32>,
}

impl<'a> AllDocIter<'a> {
    pub fn new(sub: Vec<Box<dyn DocIter + 'a>>) -> AllDocIter<'a> {
        AllDocIter {
            sub,
            current_doc: None,
        }
    }
}

impl<'a> DocIter for AllDocIter<'a> {
    fn current_doc(&self) -> Option<u32> {
        self.current_doc
    }

    fn next_doc(&mut self) -> Result<Option<u32>> {
        let mut target = match self.sub.first_mut() {
            Some(first) => match first.next_doc()? {
                Some(target) => target,
                None => {
                    self.current_doc = None;
                    return Ok(None);
                }
            },
            None => return Ok(None),
        };
        'search: loop {
            for s in self.sub.iter_mut() {
                let doc = match s.current_doc() {
                    Some(doc) if doc >= target => doc,
                    _ => match s.advance(target)? {
                        Some(doc) => doc,
                        None => {
                            self.current_doc = None;
                            return Ok(None);
                        }
                    },
                };
                if doc > target {
                    target = doc;
                    continue 'search;
                }
            }
            self.current_doc = Some(target);
            return Ok(Some(target));
        }
    }

    fn score(&self) -> f32 {
        self.sub.iter().map(|s| s.score()).sum()
    }
}

/// Disjunction. The score is the sum over the iterators on the current doc.
pub struct AnyDocIter<'a> {
    sub: Vec<Box<dyn DocIter + 'a>>,
    started: bool,
    current_doc: Option<u32>,
}

impl<'a> AnyDocIter<'a> {
    pub fn new(sub: Vec<Box<dyn DocIter + 'a>>) -> AnyDocIter<'a> {
        AnyDocIter {
            sub,
            started: false,
            current_doc: None,
        }
    }
}

impl<'a> DocIter for AnyDocIter<'a> {
    fn current_doc(&self) -> Option<u32> {
        self.current_doc
    }

    fn next_doc(&mut self) -> Result<Option<u32>> {
        if !self.started {
            self.started = true;
            for s in self.sub.iter_mut() {
                s.next_doc()?;
            }
        } else if let Some(current) = self.current_doc {
            for s in self.sub.iter_mut() {
                if s.current_doc() == Some(current) {
                    s.next_doc()?;
                }
            }
        }
        self.current_doc = self.sub.iter().filter_map(|s| s.current_doc()).min();
        Ok(self.current_doc)
    }

    fn score(&self) -> f32 {
        match self.current_doc {
            Some(current) => self
                .sub
                .iter()
                .filter(|s| s.current_doc() == Some(current))
                .map(|s| s.score())
                .sum(),
            None => 0.0,
        }
    }
}

/// Matches what `req` matches, adding the score of `opt` where it matches too.
pub struct ReqOptDocIter<'a> {
    req: Box<dyn DocIter + 'a>,
    opt: Box<dyn DocIter + 'a>,
    opt_exhausted: bool,
}

impl<'a> ReqOptDocIter<'a> {
    pub fn new(req: Box<dyn DocIter + 'a>, opt: Box<dyn DocIter + 'a>) -> ReqOptDocIter<'a> {
        ReqOptDocIter {
            req,
            opt,
            opt_exhausted: false,
        }
    }
}

impl<'a> DocIter for ReqOptDocIter<'a> {
    fn current_doc(&self) -> Option<u32> {
        self.req.current_doc()
    }

    fn next_doc(&mut self) -> Result<Option<u32>> {
        let doc = self.req.next_doc()?;
        if let Some(doc) = doc {
            if !self.opt_exhausted {
                match self.opt.current_doc() {
                    Some(opt_doc) if opt_doc >= doc => (),
                    _ => self.opt_exhausted = self.opt.advance(doc)?.is_none(),
                }
            }
        }
        Ok(doc)
    }

    fn score(&self) -> f32 {
        let current = self.req.current_doc();
        if !self.opt_exhausted && current.is_some() && self.opt.current_doc() == current {
            self.req.score() + self.opt.score()
        } else {
            self.req.score()
        }
    }
}

pub struct BoostDocIter<'a> {
    sub: Box<dyn DocIter + 'a>,
    boost: f32,
}

impl<'a> BoostDocIter<'a> {
    pub fn new(sub: Box<dyn DocIter + 'a>, boost: f32) -> BoostDocIter<'a> {
        BoostDocIter { sub, boost }
    }
}

impl<'a> DocIter for BoostDocIter<'a> {
    fn current_doc(&self) -> Option<u32> {
        self.sub.current_doc()
    }

    fn next_doc(&mut self) -> Result<Option<u32>> {
        self.sub.next_doc()
    }

    fn advance(&mut self, target: u32) -> Result<Option<u32>> {
        self.sub.advance(target)
    }

    fn score(&self) -> f32 {
        self.sub.score() * self.boost
    }
}

pub struct AllDocsDocIter {
    num_docs: u32,
    current: Option<u32>,
    score: f32,
}

impl AllDocsDocIter {
    pub fn new(num_docs: u32, score: f32) -> AllDocsDocIter {
        AllDocsDocIter {
            num_docs,
            current: None,
            score,
        }
    }
}

impl DocIter for AllDocsDocIter {
    fn current_doc(&self) -> Option<u32> {
        self.current.filter(|c| *c < self.num_docs)
    }

    fn next_doc(&mut self) -> Result<Option<u32>> {
        let next = self.current.map_or(0, |c| c.saturating_add(1));
        self.current = Some(next.min(self.num_docs));
        Ok(self.current_doc())
    }

    fn advance(&mut self, target: u32) -> Result<Option<u32>> {
        self.current = Some(target.min(self.num_docs));
        Ok(self.current_doc())
    }

    fn score(&self) -> f32 {
        self.score
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Fixed ordinals, each scoring 1.
    pub struct VecDocIter {
        docs: Vec<u32>,
        pos: Option<usize>,
    }

    impl VecDocIter {
        pub fn boxed(docs: Vec<u32>) -> Box<dyn DocIter> {
            Box::new(VecDocIter { docs, pos: None })
        }
    }

    impl DocIter for VecDocIter {
        fn current_doc(&self) -> Option<u32> {
            self.pos.and_then(|p| self.docs.get(p).cloned())
        }

        fn next_doc(&mut self) -> Result<Option<u32>> {
            self.pos = Some(self.pos.map_or(0, |p| p + 1));
            Ok(self.current_doc())
        }

        fn score(&self) -> f32 {
            1.0
        }
    }

    fn drain(iter: &mut dyn DocIter) -> Vec<(u32, f32)> {
        let mut res = Vec::new();
        while let Some(doc) = iter.next_doc().unwrap() {
            res.push((doc, iter.score()));
        }
        res
    }

    #[test]
    fn all_iter_intersects() {
        let mut iter = AllDocIter::new(vec![
            VecDocIter::boxed(vec![1, 3, 5, 7, 9]),
            VecDocIter::boxed(vec![2, 3, 7, 8]),
            VecDocIter::boxed(vec![0, 3, 4, 7]),
        ]);
        assert_eq!(vec![(3, 3.0), (7, 3.0)], drain(&mut iter));
    }

    #[test]
    fn all_iter_with_empty_sub_matches_nothing() {
        let mut iter = AllDocIter::new(vec![
            VecDocIter::boxed(vec![1, 2]),
            VecDocIter::boxed(vec![]),
        ]);
        assert!(drain(&mut iter).is_empty());
    }

    #[test]
    fn any_iter_unions_and_sums() {
        let mut iter = AnyDocIter::new(vec![
            VecDocIter::boxed(vec![1, 4]),
            VecDocIter::boxed(vec![2, 4, 6]),
        ]);
        assert_eq!(vec![(1, 1.0), (2, 1.0), (4, 2.0), (6, 1.0)], drain(&mut iter));
    }

    #[test]
    fn req_opt_only_adds_score() {
        let mut iter = ReqOptDocIter::new(
            VecDocIter::boxed(vec![1, 2, 5]),
            VecDocIter::boxed(vec![2, 3, 5]),
        );
        assert_eq!(vec![(1, 1.0), (2, 2.0), (5, 2.0)], drain(&mut iter));
    }

    #[test]
    fn all_docs_iter_advances() {
        let mut iter = AllDocsDocIter::new(4, 1.0);
        assert_eq!(Some(0), iter.next_doc().unwrap());
        assert_eq!(Some(2), iter.advance(2).unwrap());
        assert_eq!(Some(3), iter.next_doc().unwrap());
        assert_eq!(None, iter.next_doc().unwrap());
        assert_eq!(None, iter.next_doc().unwrap());
    }

    #[test]
    fn boost_scales_score() {
        let mut iter = BoostDocIter::new(VecDocIter::boxed(vec![1]), 2.5);
        assert_eq!(vec![(1, 2.5)], drain(&mut iter));
    }
}
